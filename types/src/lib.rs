//! Wire types for the `matmul.MatMul` gRPC service.
//!
//! Messages are declared directly with `prost`; the client and server stubs
//! are generated by `build.rs`.

pub mod matmul {
    /// One matrix row.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Row {
        #[prost(double, repeated, tag = "1")]
        pub values: Vec<f64>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Matrix {
        #[prost(message, repeated, tag = "1")]
        pub rows: Vec<Row>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct MultiplyRequest {
        #[prost(message, optional, tag = "1")]
        pub a: Option<Matrix>,
        #[prost(message, optional, tag = "2")]
        pub b: Option<Matrix>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct MultiplyResponse {
        #[prost(message, optional, tag = "1")]
        pub result: Option<Matrix>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SetWorkerCountRequest {
        #[prost(int64, optional, tag = "1")]
        pub num_workers: Option<i64>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SetWorkerCountResponse {
        #[prost(uint64, tag = "1")]
        pub num_workers: u64,
        #[prost(uint64, tag = "2")]
        pub previous: u64,
    }

    impl From<Vec<Vec<f64>>> for Matrix {
        fn from(rows: Vec<Vec<f64>>) -> Self {
            Self {
                rows: rows.into_iter().map(|values| Row { values }).collect(),
            }
        }
    }

    impl From<Matrix> for Vec<Vec<f64>> {
        fn from(matrix: Matrix) -> Self {
            matrix.rows.into_iter().map(|row| row.values).collect()
        }
    }

    include!(concat!(env!("OUT_DIR"), "/matmul.MatMul.rs"));
}

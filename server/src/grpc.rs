use std::time::Instant;

use matmul_types::matmul::mat_mul_server::{MatMul, MatMulServer};
use matmul_types::matmul::{
    self as proto, MultiplyRequest, MultiplyResponse, SetWorkerCountRequest,
    SetWorkerCountResponse,
};
use matrix_mul::{Dispatcher, Error, Matrix, ValidationError};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{info, warn};

#[derive(Clone)]
pub struct MatMulServiceImpl {
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
}

impl MatMulServiceImpl {
    pub fn new(dispatcher: Dispatcher, shutdown: CancellationToken) -> Self {
        Self {
            dispatcher,
            shutdown,
        }
    }
}

#[tonic::async_trait]
impl MatMul for MatMulServiceImpl {
    async fn multiply(
        &self,
        request: Request<MultiplyRequest>,
    ) -> Result<Response<MultiplyResponse>, Status> {
        let req = request.into_inner();
        let a = decode_matrix("A", req.a).map_err(reject)?;
        let b = decode_matrix("B", req.b).map_err(reject)?;

        let started = Instant::now();
        let product = self
            .dispatcher
            .run_until_cancelled(&a, &b, &self.shutdown)
            .await
            .map_err(into_status)?;

        info!(
            a = ?a.shape(),
            b = ?b.shape(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Multiply complete",
        );

        Ok(Response::new(MultiplyResponse {
            result: Some(product.to_rows().into()),
        }))
    }

    async fn set_worker_count(
        &self,
        request: Request<SetWorkerCountRequest>,
    ) -> Result<Response<SetWorkerCountResponse>, Status> {
        let req = request.into_inner();
        let size = worker_count(req.num_workers).map_err(reject)?;

        let previous = self.dispatcher.pool().resize(size).map_err(reject)?;

        Ok(Response::new(SetWorkerCountResponse {
            num_workers: size as u64,
            previous: previous as u64,
        }))
    }
}

fn decode_matrix(name: &'static str, matrix: Option<proto::Matrix>) -> Result<Matrix, ValidationError> {
    let matrix = matrix.ok_or(ValidationError::MissingField(name))?;
    Matrix::from_rows(name, matrix.into())
}

fn worker_count(num_workers: Option<i64>) -> Result<usize, ValidationError> {
    let n = num_workers.ok_or(ValidationError::MissingField("num_workers"))?;
    usize::try_from(n)
        .ok()
        .filter(|n| *n > 0)
        .ok_or(ValidationError::InvalidWorkerCount(n))
}

fn reject(err: ValidationError) -> Status {
    warn!(error = %err, "Rejected request");
    Status::invalid_argument(err.to_string())
}

fn into_status(err: Error) -> Status {
    match err {
        Error::Validation(err) => reject(err),
        Error::Cancelled { .. } => Status::cancelled(err.to_string()),
        err => Status::internal(err.to_string()),
    }
}

pub fn create_server(dispatcher: Dispatcher, shutdown: CancellationToken) -> MatMulServer<MatMulServiceImpl> {
    MatMulServer::new(MatMulServiceImpl::new(dispatcher, shutdown))
}

use std::env;

use matmul_server::proto::mat_mul_client::MatMulClient;
use matmul_server::proto::{MultiplyRequest, SetWorkerCountRequest};

/// An `rows x cols` matrix filled row by row with 1, 2, 3, ...
fn counting_matrix(rows: usize, cols: usize) -> Vec<Vec<f64>> {
    let mut next = 0.0;
    (0..rows)
        .map(|_| {
            (0..cols)
                .map(|_| {
                    next += 1.0;
                    next
                })
                .collect()
        })
        .collect()
}

fn usage(program: &str) -> ! {
    eprintln!("Usage: {} <addr> <mode> [args...]", program);
    eprintln!("Modes:");
    eprintln!("  multiply <m> <n> <p>  - Multiply m×n and n×p matrices");
    eprintln!("  workers <n>           - Set the number of workers");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let addr = args
        .get(1)
        .cloned()
        .unwrap_or_else(|| "127.0.0.1:50051".to_string());
    let mode = args.get(2).cloned().unwrap_or_else(|| "multiply".to_string());

    let mut client = MatMulClient::connect(format!("http://{}", addr)).await?;

    match mode.as_str() {
        "multiply" => {
            let m: usize = args.get(3).map_or("2", String::as_str).parse()?;
            let n: usize = args.get(4).map_or("2", String::as_str).parse()?;
            let p: usize = args.get(5).map_or("2", String::as_str).parse()?;

            let a = counting_matrix(m, n);
            let b = counting_matrix(n, p);

            println!("Matrix A ({}x{}):", m, n);
            for row in &a {
                println!("  {:?}", row);
            }
            println!("Matrix B ({}x{}):", n, p);
            for row in &b {
                println!("  {:?}", row);
            }

            let response = client
                .multiply(MultiplyRequest {
                    a: Some(a.into()),
                    b: Some(b.into()),
                })
                .await?
                .into_inner();

            let result: Vec<Vec<f64>> = response.result.unwrap_or_default().into();
            println!("Result ({}x{}):", m, p);
            for row in result {
                println!("  {:?}", row);
            }
        }
        "workers" => {
            let n: i64 = match args.get(3) {
                Some(raw) => raw.parse()?,
                None => usage(&args[0]),
            };

            let response = client
                .set_worker_count(SetWorkerCountRequest {
                    num_workers: Some(n),
                })
                .await?
                .into_inner();
            println!(
                "Number of workers updated: {} -> {}",
                response.previous, response.num_workers
            );
        }
        _ => {
            eprintln!("Unknown mode: {}", mode);
            usage(&args[0]);
        }
    }

    Ok(())
}

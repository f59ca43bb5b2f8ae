// Lambda entry point, deployed as `bootstrap` on the provided.al2023 runtime.
//
// Build with: cargo lambda build --release -p datapipe-lambda --output-format zip

#[tokio::main]
async fn main() -> Result<(), lambda_runtime::Error> {
    datapipe_lambda::run().await
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Demo backends (greeter, calculator, echo) served by `demo-backend` and the e2e tests
    tonic_prost_build::configure().compile_protos(
        &[
            "proto/demo/v1/helloworld.proto",
            "proto/demo/v1/calculator.proto",
            "proto/demo/v1/echo.proto",
        ],
        &["proto"],
    )?;

    Ok(())
}

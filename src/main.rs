use passiflora::cli;

fn main() -> anyhow::Result<()> {
    // 로그는 stderr로 (stdout의 JSON 출력을 오염시키지 않음)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let code = rt.block_on(async move {
        match cli::run(args).await {
            Ok(code) => code,
            Err(e) => {
                eprintln!("✗ Error: {}", e);
                1
            }
        }
    });

    drop(rt);
    std::process::exit(code);
}

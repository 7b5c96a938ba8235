//! `byteflow server` — Start the ByteFlow HTTP backend server.

pub async fn run(
    host: String,
    port: u16,
    pipeline_path: Option<String>,
    static_dir: Option<String>,
) -> Result<(), String> {
    let config = byteflow_server::ServerConfig {
        host: host.clone(),
        port,
        pipeline_path,
        static_dir,
    };

    println!("Starting ByteFlow server on {}:{}...", host, port);

    let addr = byteflow_server::start_server(config).await?;
    println!("ByteFlow server listening on http://{}", addr);

    // Keep the process running until interrupted
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to listen for Ctrl+C: {}", e))?;

    println!("\nShutting down...");
    Ok(())
}

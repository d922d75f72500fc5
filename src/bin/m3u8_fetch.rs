use std::env;
use std::path::PathBuf;

use m3u8_workflow::{DownloadProgress, Workflow, WorkflowConfig};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: m3u8_fetch <playlist-url> [workspace]");
        std::process::exit(1);
    }

    if let Err(error) = m3u8_workflow::init() {
        eprintln!("Failed to initialize logging: {error}");
    }

    let playlist_url = args[1].clone();
    let workspace = args.get(2).map(PathBuf::from);

    match run(&playlist_url, workspace).await {
        Ok(output) => println!("{}", output.display()),
        Err(error) => {
            eprintln!("Error: {error}");
            std::process::exit(1);
        }
    }
}

async fn run(playlist_url: &str, workspace: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let mut config = WorkflowConfig::load()?;
    config.apply_env_overrides()?;
    if let Some(workspace) = workspace {
        config.workspace_root = workspace;
    }
    config.validate()?;

    let workflow = Workflow::with_http_client(playlist_url, config)?;

    let state = workflow.attach_async().await?;
    tracing::info!(
        "{}: {} segments in {}",
        state.name,
        state.segments.len(),
        workflow.workspace_dir().display()
    );

    workflow.download_async(print_progress).await?;
    let output = workflow.combine_async().await?;
    Ok(output)
}

fn print_progress(progress: DownloadProgress, delta: u64) {
    eprintln!(
        "  {}/{} bytes ({:.1}%) +{}",
        progress.completed,
        progress.total,
        progress.fraction() * 100.0,
        delta
    );
}

use anyhow::{bail, Context, Result};
use clap::Parser;
use deltavault::config::Config;
use deltavault::network::{Headers, PeerClient, PeerEndpoint};
use deltavault::transfer::{TransferOrchestrator, UploadRequest, UploadRoute};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Upload a new version of a file, sending only what changed
#[derive(Parser, Debug)]
#[command(name = "deltavault-upload", version)]
struct Args {
    /// Local file holding the new version
    content: PathBuf,

    /// Base to sign, as HOST:PORT/RESOURCE
    #[arg(long)]
    sign: PeerEndpoint,

    /// Where the new version is published, as HOST:PORT/RESOURCE
    #[arg(long)]
    delta: PeerEndpoint,

    /// Full-upload destination when the delta route is not taken
    #[arg(long)]
    fallback: Option<PeerEndpoint>,

    /// Identifier of the base on the peer; the sign resource when omitted
    #[arg(long)]
    base: Option<String>,

    /// Extra request header, as KEY=VALUE
    #[arg(long = "header", value_name = "KEY=VALUE")]
    headers: Vec<String>,

    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override delta.block_size
    #[arg(long)]
    block_size: Option<usize>,

    /// Override delta.reuse_threshold
    #[arg(long)]
    threshold: Option<f64>,

    /// Accept any peer certificate, for peers with self-signed certificates
    #[arg(long)]
    insecure: bool,
}

fn parse_headers(raw: &[String]) -> Result<Headers> {
    raw.iter()
        .map(|header| {
            let (key, value) = header
                .split_once('=')
                .with_context(|| format!("header {header:?} is not KEY=VALUE"))?;
            Ok((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        bail!("Failed to install rustls crypto provider");
    }

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(block_size) = args.block_size {
        config.delta.block_size = block_size;
    }
    if let Some(threshold) = args.threshold {
        config.delta.reuse_threshold = threshold;
    }
    if args.insecure {
        config.network.insecure_skip_verify = true;
    }
    config.validate()?;

    let request = UploadRequest {
        content: args.content,
        old_file_identifier: args.base.unwrap_or_else(|| args.sign.resource.clone()),
        sign_endpoint: args.sign,
        delta_endpoint: args.delta,
        fallback_endpoint: args.fallback,
        headers: parse_headers(&args.headers)?,
    };

    let client = PeerClient::new(config.network.clone()).await?;
    let orchestrator = TransferOrchestrator::new(client, config.delta.clone());
    let result = orchestrator.upload(&request).await;
    orchestrator.peer().close();
    let outcome = result?;

    let route = match outcome.route {
        UploadRoute::Delta => "delta",
        UploadRoute::Full => "full",
    };
    println!("Uploaded {} via {} route", request.content.display(), route);
    if let Some(hit_rate) = outcome.hit_rate {
        println!("  hit rate:   {:.1}%", hit_rate * 100.0);
    }
    if let Some(reason) = &outcome.fallback_reason {
        println!("  fallback:   {}", reason);
    }
    println!(
        "  sent:       {} of {} bytes in {:?}",
        outcome.bytes_sent, outcome.content_size, outcome.elapsed
    );
    println!("  sha256:     {}", outcome.blob.sha256);
    println!("  location:   {}", outcome.blob.location);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_headers() {
        let headers = parse_headers(&["X-Repo = main".into(), "a=b=c".into()]).unwrap();
        assert_eq!(headers["X-Repo"], "main");
        assert_eq!(headers["a"], "b=c");
        assert!(parse_headers(&["novalue".into()]).is_err());
    }

    #[test]
    fn test_args() {
        let args = Args::try_parse_from([
            "deltavault-upload",
            "new.bin",
            "--sign",
            "127.0.0.1:4433/app-v1",
            "--delta",
            "127.0.0.1:4433/app-v2",
            "--header",
            "k=v",
        ])
        .unwrap();
        assert_eq!(args.sign.resource, "app-v1");
        assert!(args.fallback.is_none());
        assert_eq!(args.headers, vec!["k=v".to_string()]);
        assert!(!args.insecure);

        let args = Args::try_parse_from([
            "deltavault-upload",
            "new.bin",
            "--sign",
            "127.0.0.1:4433/app-v1",
            "--delta",
            "127.0.0.1:4433/app-v2",
            "--insecure",
        ])
        .unwrap();
        assert!(args.insecure);
    }
}

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use agora_uploader::config::{self, Config};
use agora_uploader::uploader;
use agora_uploader::{
    AgoraClient, AppError, CompleteParams, Credentials, TransportConfig, UploadRequest,
    WaitOptions,
};

#[derive(Parser, Debug)]
#[command(name = "agora-uploader", version, about = "for uploading data to Agora")]
struct Cli {
    /// The URL to the Agora server
    #[arg(short = 'u', long)]
    url: String,

    /// The path to a file or folder to be uploaded
    #[arg(short = 'p', long)]
    path: PathBuf,

    /// The ID of the target folder where the data is uploaded to
    #[arg(short = 'f', long, default_value_t = -1, allow_negative_numbers = true)]
    target_folder: i64,

    /// The Agora API key used for authentication
    #[arg(short = 'k', long, env = "AGORA_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Username, exchanged together with the password for the API key
    #[arg(long, env = "AGORA_USER")]
    user: Option<String>,

    #[arg(long, env = "AGORA_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// If the uploaded file is a zip, it is extracted and its content is imported into Agora
    #[arg(long)]
    extract_zip: bool,

    /// Verifies if all the uploaded files were imported correctly (waits until the import is complete)
    #[arg(long)]
    verify: bool,

    /// The json which will be used for the import
    #[arg(short = 'j', long)]
    import_json: Option<String>,

    /// Don't check the server certificate
    #[arg(long)]
    no_check_certificate: bool,

    /// Run the uploader without actually uploading the files (for testing and debugging)
    #[arg(long)]
    fake: bool,

    /// Return as soon as the import has been completed
    #[arg(long, conflicts_with = "verify")]
    no_wait: bool,

    /// Seconds to wait for the import to finish, negative waits forever
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    timeout: i64,

    /// Path to a JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match config::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        config.log_level_filter()
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    log::debug!("Starting agora-uploader v{}", env!("CARGO_PKG_VERSION"));

    match run(cli, config).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            log::error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

/// Returns whether every file made it to the server (and into the import,
/// when verifying).
async fn run(cli: Cli, config: Config) -> anyhow::Result<bool> {
    let transport = TransportConfig {
        accept_invalid_certs: cli.no_check_certificate,
        timeout: config.request_timeout(),
    };

    let client = AgoraClient::new(&cli.url, Credentials::Anonymous, &transport)?;
    client.ping().await?;

    let (client, api_key) = match cli.api_key.clone().filter(|k| !k.is_empty()) {
        Some(key) => (client, key),
        None => {
            let (Some(user), Some(password)) = (cli.user.clone(), cli.password.clone()) else {
                return Err(AppError::authentication(
                    "No api-key given. Pass --api-key or --user and --password",
                )
                .into());
            };
            let client = client.with_credentials(Credentials::Basic { user, password });
            let key = client.fetch_api_key().await?;
            (client, key)
        }
    };

    let client = client.with_credentials(Credentials::ApiKey(api_key));
    client.check_connection().await?;

    if cli.extract_zip {
        uploader::extract_zip_applies(&cli.path);
    }

    log::debug!("Starting upload of {} to {}", cli.path.display(), cli.url);
    let request = UploadRequest {
        paths: vec![cli.path.clone()],
        complete: CompleteParams {
            target_folder_id: cli.target_folder,
            exam_id: -1,
            series_id: -1,
            task_definition_id: -1,
            import_file: cli.import_json.clone(),
            extract_zip: cli.extract_zip,
        },
        wait: WaitOptions::new(!cli.no_wait, cli.verify, cli.timeout),
    };

    let outcome = uploader::upload(
        Arc::new(client),
        request,
        config.upload_options(cli.fake),
    )
    .await
    .with_context(|| format!("upload of {} failed", cli.path.display()))?;

    if let Some(progress) = &outcome.progress {
        log::info!(
            "Import {} finished with state {} ({}%)",
            outcome.import_id,
            progress.state,
            progress.progress
        );
    }

    let mut success = outcome.report.is_complete_success();
    if cli.verify {
        success &= outcome.all_imported();
    }

    Ok(success)
}

use anyhow::{Context, Result};
use blobfs::{
    AdapterConfig, BlobFileSystem, Digest, FileAccess, FileMode, FileSystemStore, RegistryStore,
    config::ConnectionArgs,
};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::{
    fs::File,
    io::{AsyncWrite, AsyncWriteExt},
};
use tokio_util::io::ReaderStream;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Inspect and edit a blob container as a file system and registry store.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the immediate children of a directory
    Ls {
        #[arg(default_value = "")]
        path: String,
    },
    /// Show a file or directory entry
    Stat { path: String },
    /// Write a file's content to stdout
    Cat { path: String },
    /// Upload a local file
    Put {
        path: String,
        file: PathBuf,
        /// create-new, create, open-or-create, truncate or append
        #[arg(long, default_value = "create")]
        mode: FileMode,
    },
    /// Server-side copy
    Cp {
        from: String,
        to: String,
        #[arg(long)]
        overwrite: bool,
    },
    /// Copy then delete the source
    Mv { from: String, to: String },
    /// Delete a file
    Rm { path: String },
    /// Delete a directory (only with --recursive does anything happen)
    Rmdir {
        path: String,
        #[arg(long)]
        recursive: bool,
    },
    /// Stage a local file as a new registry upload and print its id
    Upload { file: PathBuf },
    /// Commit an upload as a blob, or abort it when no digest is given
    CompleteUpload {
        id: String,
        #[arg(long)]
        digest: Option<Digest>,
    },
    /// List in-progress upload ids
    Uploads,
    /// List manifest digests
    Manifests,
    /// List blob digests
    Blobs,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // --- Parse config ---
    let cli = Cli::parse();
    let cfg = AdapterConfig::from_env_and_args(cli.connection)?;
    tracing::info!("Opening blob file system with config: {:?}", cfg);

    let fs = cfg.connect()?;
    run(&fs, cli.command).await
}

async fn run(fs: &BlobFileSystem, command: Command) -> Result<()> {
    match command {
        Command::Ls { path } => {
            for entry in fs.list_contents(&path).await? {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
        Command::Stat { path } => match fs.get_info(&path).await? {
            Some(entry) => println!("{}", serde_json::to_string(&entry)?),
            None => anyhow::bail!("`{}` does not exist", path),
        },
        Command::Cat { path } => {
            let mut file = fs.open(&path, FileMode::Open, FileAccess::Read).await?;
            let mut stdout = tokio::io::stdout();
            tokio::io::copy(&mut file, &mut stdout).await?;
            stdout.flush().await?;
            file.close().await?;
        }
        Command::Put { path, file, mode } => {
            let mut target = fs.open(&path, mode, FileAccess::Write).await?;
            let (size, md5) = stream_into(&file, &mut target).await?;
            target.close().await?;
            tracing::info!("uploaded {} bytes to {}", size, path);
            println!("{}", json!({ "path": path, "size": size, "md5": md5 }));
        }
        Command::Cp {
            from,
            to,
            overwrite,
        } => fs.copy(&from, &to, overwrite).await?,
        Command::Mv { from, to } => fs.rename(&from, &to).await?,
        Command::Rm { path } => fs.delete(&path).await?,
        Command::Rmdir { path, recursive } => fs.delete_directory(&path, recursive).await?,
        Command::Upload { file } => {
            let id = Uuid::new_v4().to_string();
            let mut upload = fs.create_upload(&id).await?;
            let (size, md5) = stream_into(&file, &mut upload).await?;
            upload.close().await?;
            println!("{}", json!({ "upload_id": id, "size": size, "md5": md5 }));
        }
        Command::CompleteUpload { id, digest } => {
            let size = fs.complete_upload(&id, digest.as_ref()).await?;
            println!(
                "{}",
                json!({ "upload_id": id, "digest": digest, "size": size })
            );
        }
        Command::Uploads => {
            for id in fs.list_uploads().await? {
                println!("{}", json!({ "upload_id": id }));
            }
        }
        Command::Manifests => {
            for digest in fs.list_manifests().await? {
                println!("{}", json!({ "digest": digest }));
            }
        }
        Command::Blobs => {
            for digest in fs.list_blobs().await? {
                println!("{}", json!({ "digest": digest }));
            }
        }
    }

    Ok(())
}

/// Stream a local file into `target`, returning its size and MD5.
async fn stream_into<W>(source: &Path, target: &mut W) -> Result<(u64, String)>
where
    W: AsyncWrite + Unpin,
{
    let file = File::open(source)
        .await
        .with_context(|| format!("opening {}", source.display()))?;
    let mut stream = ReaderStream::new(file);

    let mut size = 0u64;
    let mut digest = md5::Context::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.with_context(|| format!("reading {}", source.display()))?;
        size += chunk.len() as u64;
        digest.consume(&chunk);
        target.write_all(&chunk).await?;
    }

    Ok((size, format!("{:x}", digest.compute())))
}

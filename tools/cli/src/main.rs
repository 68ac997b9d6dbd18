//! Integrator CLI - OneDrive and OneNote from the command line.
//!
//! Signs in with the public-client identity from the secrets file, then runs
//! one Graph operation per invocation.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};

use integrator_auth::{
    Credentials, DeviceCodeHandler, DeviceCodePrompt, InteractiveMode, PublicClient,
    TokenAcquisition, TokenOptions, TokenProvider,
};
use integrator_common::{extract_folder_id, logging, AccessToken, LogConfig};
use integrator_graph::{
    DriveTreeSource, GraphClient, GraphConfig, NotebookTreeSource, OneDrive, OneNote, TreeWalker,
    WalkOptions, WalkResult,
};

#[derive(Parser)]
#[command(name = "integrator")]
#[command(about = "Integrator - OneDrive and OneNote via Microsoft Graph")]
#[command(version)]
struct Cli {
    /// Secrets file (default: OneDriveConfig.json in the Downloads folder).
    #[arg(long, global = true)]
    secrets: Option<PathBuf>,

    /// Interactive sign-in flow.
    #[arg(long, value_enum, default_value_t = LoginMode::Device, global = true)]
    login: LoginMode,

    /// Give up on interactive sign-in after this many seconds.
    #[arg(long, global = true)]
    login_timeout: Option<u64>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write logs to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LoginMode {
    /// Enter a code on another device.
    Device,
    /// Sign in through the system browser.
    Browser,
}

impl From<LoginMode> for InteractiveMode {
    fn from(mode: LoginMode) -> Self {
        match mode {
            LoginMode::Device => InteractiveMode::DeviceCode,
            LoginMode::Browser => InteractiveMode::Browser,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire a token and report where it came from.
    Token,

    /// Print the OneDrive folder tree as JSON.
    Tree {
        /// Folder to start from (default: drive root).
        #[arg(long, conflicts_with = "from_base")]
        folder_id: Option<String>,

        /// Start from the folder named by BASE_FOLDER_URL.
        #[arg(long)]
        from_base: bool,

        /// Expand containers down to this level only.
        #[arg(long)]
        max_depth: Option<usize>,

        /// Write the tree to a file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print notebooks, sections and pages as JSON.
    NotebookTree {
        /// Walk a single notebook.
        #[arg(long)]
        notebook_id: Option<String>,

        /// Write the tree to a file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Create a folder.
    Mkdir {
        name: String,

        /// Parent folder id (default: drive root).
        #[arg(long)]
        parent: Option<String>,
    },

    /// Upload a local file into a folder.
    Upload {
        #[arg(long)]
        folder_id: String,

        #[arg(short, long)]
        file: PathBuf,
    },

    /// Download a file from a folder.
    Download {
        #[arg(long)]
        folder_id: String,

        /// File name inside the folder.
        #[arg(short, long)]
        name: String,

        /// Local directory to write into.
        #[arg(short, long, default_value = ".")]
        dest: PathBuf,
    },

    /// Delete a drive item.
    Rm {
        #[arg(long)]
        item_id: String,
    },

    /// Delete a folder and everything in it.
    Rmdir {
        #[arg(long)]
        folder_id: String,
    },

    /// List notebooks.
    Notebooks,

    /// Look up a notebook by name.
    FindNotebook { name: String },

    /// List sections of a notebook.
    Sections {
        #[arg(long)]
        notebook_id: String,
    },

    /// List pages of a section.
    Pages {
        #[arg(long)]
        section_id: String,
    },

    /// Show page metadata, or its HTML with --content.
    Page {
        #[arg(long)]
        page_id: String,

        #[arg(long)]
        content: bool,
    },

    /// Create a section in a notebook.
    NewSection {
        #[arg(long)]
        notebook_id: String,

        #[arg(short, long)]
        name: String,
    },

    /// Create a page from an HTML fragment.
    NewPage {
        #[arg(long)]
        section_id: String,

        #[arg(short, long)]
        title: String,

        #[arg(short, long)]
        content: String,
    },

    /// Append an HTML fragment to a page.
    Append {
        #[arg(long)]
        page_id: String,

        #[arg(short, long)]
        content: String,
    },

    /// Print the folder id encoded in a OneDrive folder URL.
    FolderId { url: String },
}

/// Signed-in session shared by the commands.
struct Session {
    credentials: Credentials,
    provider: TokenProvider,
    graph: GraphClient,
}

impl Session {
    fn open(cli: &Cli) -> Result<Self> {
        let path = match &cli.secrets {
            Some(path) => path.clone(),
            None => Credentials::default_path()
                .context("No Downloads folder; pass --secrets")?,
        };
        let credentials = Credentials::load(&path)?;

        let handler: DeviceCodeHandler = Arc::new(|prompt: &DeviceCodePrompt| {
            eprintln!("{}", prompt);
        });
        let identity = PublicClient::new(&credentials, cli.login.into())?
            .with_device_code_handler(handler);

        let provider = TokenProvider::new(&credentials, Arc::new(identity)).with_options(
            TokenOptions {
                interactive_timeout: cli.login_timeout.map(Duration::from_secs),
                ..Default::default()
            },
        );

        let graph = GraphClient::new(GraphConfig {
            base_url: credentials.graph_base_url().to_string(),
            ..Default::default()
        })?;

        Ok(Self {
            credentials,
            provider,
            graph,
        })
    }

    async fn token(&self) -> Result<AccessToken> {
        self.provider
            .acquire()
            .await
            .context("Failed to acquire access token")
    }

    fn drive(&self) -> OneDrive {
        OneDrive::new(self.graph.clone())
    }

    fn onenote(&self) -> OneNote {
        OneNote::new(self.graph.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    logging::init(&LogConfig {
        level,
        log_file: cli.log_file.clone(),
    })?;

    if let Commands::FolderId { url } = &cli.command {
        println!("{}", extract_folder_id(url)?);
        return Ok(());
    }

    let session = Session::open(&cli)?;

    match cli.command {
        Commands::Token => cmd_token(&session).await,

        Commands::Tree {
            folder_id,
            from_base,
            max_depth,
            output,
        } => cmd_tree(&session, folder_id, from_base, max_depth, output.as_deref()).await,

        Commands::NotebookTree {
            notebook_id,
            output,
        } => cmd_notebook_tree(&session, notebook_id.as_deref(), output.as_deref()).await,

        Commands::Mkdir { name, parent } => cmd_mkdir(&session, &name, parent.as_deref()).await,

        Commands::Upload { folder_id, file } => cmd_upload(&session, &folder_id, &file).await,

        Commands::Download {
            folder_id,
            name,
            dest,
        } => cmd_download(&session, &folder_id, &name, &dest).await,

        Commands::Rm { item_id } => cmd_rm(&session, &item_id).await,

        Commands::Rmdir { folder_id } => cmd_rmdir(&session, &folder_id).await,

        Commands::Notebooks => cmd_notebooks(&session).await,

        Commands::FindNotebook { name } => cmd_find_notebook(&session, &name).await,

        Commands::Sections { notebook_id } => cmd_sections(&session, &notebook_id).await,

        Commands::Pages { section_id } => cmd_pages(&session, &section_id).await,

        Commands::Page { page_id, content } => cmd_page(&session, &page_id, content).await,

        Commands::NewSection { notebook_id, name } => {
            cmd_new_section(&session, &notebook_id, &name).await
        }

        Commands::NewPage {
            section_id,
            title,
            content,
        } => cmd_new_page(&session, &section_id, &title, &content).await,

        Commands::Append { page_id, content } => cmd_append(&session, &page_id, &content).await,

        Commands::FolderId { .. } => Ok(()),
    }
}

/// Print a value as pretty JSON, to `output` when given.
fn emit<T: Serialize + ?Sized>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn cmd_token(session: &Session) -> Result<()> {
    match session.provider.acquire_with_source().await {
        TokenAcquisition::Failed(reason) => anyhow::bail!("Token acquisition failed: {}", reason),
        acquisition => {
            let source = acquisition.source();
            let token = acquisition.into_result()?;
            println!("Token acquired ({})", source);
            println!("  Preview: {}", token.preview());
            Ok(())
        }
    }
}

async fn cmd_tree(
    session: &Session,
    folder_id: Option<String>,
    from_base: bool,
    max_depth: Option<usize>,
    output: Option<&Path>,
) -> Result<()> {
    let start = if from_base {
        Some(
            session
                .credentials
                .base_folder_id()?
                .context("BASE_FOLDER_URL is not set in the secrets file")?,
        )
    } else {
        folder_id
    };

    let token = session.token().await?;
    let walker = TreeWalker::new(DriveTreeSource::new(session.drive()))
        .with_options(WalkOptions { max_depth });

    info!("Walking drive from {}", start.as_deref().unwrap_or("root"));
    let walk = walker.walk(token.secret(), start.as_deref()).await;
    emit_tree(walk, output)
}

async fn cmd_notebook_tree(
    session: &Session,
    notebook_id: Option<&str>,
    output: Option<&Path>,
) -> Result<()> {
    let token = session.token().await?;
    let walker = TreeWalker::new(NotebookTreeSource::new(session.onenote()));

    let start = notebook_id.map(NotebookTreeSource::notebook_ref);
    let walk = walker.walk(token.secret(), start.as_deref()).await;
    emit_tree(walk, output)
}

fn emit_tree(walk: WalkResult, output: Option<&Path>) -> Result<()> {
    if walk.truncated {
        warn!("Top-level listing has more pages; only the first page is included");
    }
    emit(&walk.nodes, output)
}

async fn cmd_mkdir(session: &Session, name: &str, parent: Option<&str>) -> Result<()> {
    let token = session.token().await?;
    let drive = session.drive();

    let item = match parent {
        Some(parent) => drive.create_folder_in(token.secret(), parent, name).await,
        None => drive.create_folder(token.secret(), name).await,
    }
    .context("Failed to create folder")?;

    println!("Folder created: {}", item.name);
    println!("  ID: {}", item.id);
    Ok(())
}

async fn cmd_upload(session: &Session, folder_id: &str, file: &Path) -> Result<()> {
    let token = session.token().await?;
    let item = session
        .drive()
        .upload_path(token.secret(), folder_id, file)
        .await
        .with_context(|| format!("Failed to upload {}", file.display()))?;

    println!("Uploaded {} ({} bytes)", item.name, item.size.unwrap_or(0));
    println!("  ID: {}", item.id);
    Ok(())
}

async fn cmd_download(session: &Session, folder_id: &str, name: &str, dest: &Path) -> Result<()> {
    let token = session.token().await?;
    let path = session
        .drive()
        .download_to(token.secret(), folder_id, name, dest)
        .await
        .with_context(|| format!("Failed to download {}", name))?;

    println!("Downloaded to {}", path.display());
    Ok(())
}

async fn cmd_rm(session: &Session, item_id: &str) -> Result<()> {
    let token = session.token().await?;
    session
        .drive()
        .delete_item(token.secret(), item_id)
        .await
        .context("Failed to delete item")?;

    println!("Deleted {}", item_id);
    Ok(())
}

async fn cmd_rmdir(session: &Session, folder_id: &str) -> Result<()> {
    let token = session.token().await?;
    session
        .drive()
        .delete_folder_and_contents(token.secret(), folder_id)
        .await
        .context("Failed to delete folder")?;

    println!("Deleted folder {}", folder_id);
    Ok(())
}

async fn cmd_notebooks(session: &Session) -> Result<()> {
    let token = session.token().await?;
    let notebooks = session.onenote().list_notebooks(token.secret()).await?;

    if notebooks.is_empty() {
        println!("(no notebooks)");
    }
    for notebook in notebooks {
        println!("{}  {}", notebook.id, notebook.display_name);
    }
    Ok(())
}

async fn cmd_find_notebook(session: &Session, name: &str) -> Result<()> {
    let token = session.token().await?;

    match session
        .onenote()
        .find_notebook_by_name(token.secret(), name)
        .await?
    {
        Some(notebook) => {
            println!("Notebook: {}", notebook.display_name);
            println!("  ID: {}", notebook.id);
        }
        None => match session.drive().find_notebook(token.secret(), name).await? {
            Some(item) => {
                println!("Notebook file in OneDrive: {}", item.name);
                println!("  Item ID: {}", item.id);
            }
            None => anyhow::bail!("No notebook named {}", name),
        },
    }
    Ok(())
}

async fn cmd_sections(session: &Session, notebook_id: &str) -> Result<()> {
    let token = session.token().await?;
    let sections = session
        .onenote()
        .list_sections(token.secret(), notebook_id)
        .await?;

    for section in sections {
        println!("{}  {}", section.id, section.display_name);
    }
    Ok(())
}

async fn cmd_pages(session: &Session, section_id: &str) -> Result<()> {
    let token = session.token().await?;
    let pages = session.onenote().list_pages(token.secret(), section_id).await?;

    for page in pages {
        println!("{}  {}", page.id, page.title);
    }
    Ok(())
}

async fn cmd_page(session: &Session, page_id: &str, content: bool) -> Result<()> {
    let token = session.token().await?;
    let onenote = session.onenote();

    if content {
        println!("{}", onenote.get_page_content(token.secret(), page_id).await?);
    } else {
        emit(&onenote.get_page(token.secret(), page_id).await?, None)?;
    }
    Ok(())
}

async fn cmd_new_section(session: &Session, notebook_id: &str, name: &str) -> Result<()> {
    let token = session.token().await?;
    let section = session
        .onenote()
        .create_section(token.secret(), notebook_id, name)
        .await
        .context("Failed to create section")?;

    println!("Section created: {}", section.display_name);
    println!("  ID: {}", section.id);
    Ok(())
}

async fn cmd_new_page(session: &Session, section_id: &str, title: &str, content: &str) -> Result<()> {
    let token = session.token().await?;
    let page = session
        .onenote()
        .create_page(token.secret(), section_id, title, content)
        .await
        .context("Failed to create page")?;

    println!("Page created: {}", page.title);
    println!("  ID: {}", page.id);
    Ok(())
}

async fn cmd_append(session: &Session, page_id: &str, content: &str) -> Result<()> {
    let token = session.token().await?;
    session
        .onenote()
        .append_to_page(token.secret(), page_id, content)
        .await
        .context("Failed to append to page")?;

    println!("Appended to page {}", page_id);
    Ok(())
}

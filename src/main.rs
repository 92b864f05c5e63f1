mod app;
mod event;
mod ui;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use sharecycle::cache::QueryCache;
use sharecycle::config::{BackendKind, Config};
use sharecycle::donations::{DonationHooks, DonationUpdate};
use sharecycle::error::DataError;
use sharecycle::gateway::http::HttpBackend;
use sharecycle::gateway::memory::MemoryBackend;
use sharecycle::gateway::session_file::SessionFile;
use sharecycle::gateway::{AuthGateway, Backend};
use sharecycle::model::{
  Category, Condition, Donation, DonationFilters, DonationId, DonationPatch, DonationStatus, Identity, NewDonation,
};
use sharecycle::session::{resolve_identity, AuthSession};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "SHARECYCLE_LOG";

#[derive(Parser, Debug)]
#[command(name = "sharecycle")]
#[command(about = "Give away and find second-hand items in your community")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/sharecycle/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Browse listings in the terminal UI (default)
  Browse,
  /// Print listings, newest first
  List {
    #[arg(long)]
    category: Option<Category>,
    #[arg(long)]
    status: Option<DonationStatus>,
    /// Text to look for in title or description
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    location: Option<String>,
  },
  /// Print one listing
  Show { id: String },
  /// Print the listings of the signed-in user, or of --owner
  Mine {
    #[arg(long)]
    owner: Option<String>,
  },
  /// List a new item
  Donate {
    #[arg(long)]
    title: String,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long)]
    category: Category,
    #[arg(long)]
    condition: Condition,
    #[arg(long)]
    location: String,
    #[arg(long)]
    image_url: Option<String>,
  },
  /// Change fields of one of your listings
  Update {
    id: String,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    category: Option<Category>,
    #[arg(long)]
    condition: Option<Condition>,
    #[arg(long)]
    location: Option<String>,
    #[arg(long)]
    image_url: Option<String>,
    #[arg(long)]
    status: Option<DonationStatus>,
  },
  /// Remove one of your listings
  Delete { id: String },
  /// Create an account
  Register {
    #[arg(long)]
    email: String,
    #[arg(long)]
    name: Option<String>,
    /// Falls back to SHARECYCLE_PASSWORD
    #[arg(long)]
    password: Option<String>,
  },
  /// Sign in and remember the session
  Login {
    #[arg(long)]
    email: String,
    /// Falls back to SHARECYCLE_PASSWORD
    #[arg(long)]
    password: Option<String>,
  },
  /// Sign out and forget the session
  Logout,
  /// Print the signed-in user
  Whoami,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let guard = init_logging();

  if let Err(report) = run(args).await {
    // Data errors map to distinct exit codes for scripting
    if let Some(e) = report.downcast_ref::<DataError>() {
      eprintln!("error: {}", e);
      drop(guard);
      std::process::exit(e.exit_code());
    }
    return Err(report);
  }
  Ok(())
}

/// Log to a file in the data directory; the terminal belongs to the UI.
fn init_logging() -> Option<WorkerGuard> {
  let dir = Config::data_dir()?;
  std::fs::create_dir_all(&dir).ok()?;

  let appender = tracing_appender::rolling::never(&dir, "sharecycle.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("sharecycle=info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();
  Some(guard)
}

async fn run(args: Args) -> Result<()> {
  let config = Config::load(args.config.as_deref())?;
  let (backend, host) = build_backend(&config)?;
  let hooks = DonationHooks::new(Arc::clone(&backend), QueryCache::new()).with_policy(config.cache.stale_policy());

  match args.command.unwrap_or(Command::Browse) {
    Command::Browse => {
      let title = config.title.clone().unwrap_or_else(|| "ShareCycle".to_string());
      let auth = AuthSession::init(Arc::clone(&backend));
      let mut app = app::App::new(hooks, auth, title, host);
      app.run().await?;
    }
    Command::List {
      category,
      status,
      search,
      location,
    } => {
      let filters = DonationFilters {
        category,
        status,
        search,
        location,
      };
      let donations = hooks.fetch_list(&filters).await?;
      print_table(&donations);
    }
    Command::Show { id } => {
      let donation = hooks.fetch_detail(&DonationId(id)).await?;
      print_donation(&donation);
    }
    Command::Mine { owner } => {
      let explicit = owner.map(|id| Identity {
        id,
        email: String::new(),
        display_name: None,
      });
      let mut auth = AuthSession::init(Arc::clone(&backend));
      while auth.is_loading() && auth.changed().await {}
      let Some(user) = resolve_identity(explicit.as_ref(), &auth.state()) else {
        return Err(DataError::unauthorized("not signed in, run `sharecycle login` or pass --owner").into());
      };
      let donations = hooks.fetch_owned_by(&user.id).await?;
      print_table(&donations);
    }
    Command::Donate {
      title,
      description,
      category,
      condition,
      location,
      image_url,
    } => {
      let input = NewDonation {
        title,
        description,
        category,
        condition,
        location,
        image_url,
      };
      let created = hooks.create().run(input).await?;
      println!("Listed {} ({})", created.title, created.id);
    }
    Command::Update {
      id,
      title,
      description,
      category,
      condition,
      location,
      image_url,
      status,
    } => {
      let patch = DonationPatch {
        title,
        description,
        category,
        condition,
        location,
        image_url,
        status,
      };
      if patch.is_empty() {
        return Err(eyre!("Nothing to update. Pass at least one field, e.g. --status donated."));
      }
      let updated = hooks
        .update()
        .run(DonationUpdate {
          id: DonationId(id),
          patch,
        })
        .await?;
      print_donation(&updated);
    }
    Command::Delete { id } => {
      let id = DonationId(id);
      hooks.delete().run(id.clone()).await?;
      println!("Deleted {}", id);
    }
    Command::Register { email, name, password } => {
      let password = password.map_or_else(Config::get_password, Ok)?;
      match backend.sign_up(&email, &password, name.as_deref()).await? {
        Some(session) => println!("Registered and signed in as {}", session.user.label()),
        None => println!("Registered. Confirm your email address, then run `sharecycle login`."),
      }
    }
    Command::Login { email, password } => {
      let password = password.map_or_else(Config::get_password, Ok)?;
      let session = backend.sign_in(&email, &password).await?;
      info!(user = %session.user.id, "signed in");
      println!("Signed in as {}", session.user.label());
    }
    Command::Logout => {
      backend.sign_out().await?;
      println!("Signed out");
    }
    Command::Whoami => match backend.current_session().await? {
      Some(session) => println!("{} <{}> ({})", session.user.label(), session.user.email, session.user.id),
      None => println!("Not signed in"),
    },
  }
  Ok(())
}

fn build_backend(config: &Config) -> Result<(Arc<dyn Backend>, String)> {
  match config.backend.kind {
    BackendKind::Memory => {
      info!("using in-memory demo backend");
      let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::seeded());
      Ok((backend, "demo data".to_string()))
    }
    BackendKind::Http => {
      let url = config.backend_url()?;
      let mut backend = HttpBackend::new(&url, Config::get_anon_key()?, config.timeout())?;
      if let Some(path) = SessionFile::default_path() {
        backend = backend.with_session_file(SessionFile::new(path));
      }
      info!(url = %backend.base_url(), "using http backend");
      let backend: Arc<dyn Backend> = Arc::new(backend);
      Ok((backend, url))
    }
  }
}

fn print_table(donations: &[Donation]) {
  if donations.is_empty() {
    println!("No donations found.");
    return;
  }
  for d in donations {
    println!(
      "{:<12} {:<10} {:<12} {:<40} {}",
      d.id,
      d.status,
      d.category,
      d.title,
      d.location
    );
  }
}

fn print_donation(d: &Donation) {
  println!("{}", d.title);
  println!("  id:        {}", d.id);
  println!("  status:    {}", d.status);
  println!("  category:  {}", d.category);
  println!("  condition: {}", d.condition);
  println!("  location:  {}", d.location);
  if let Some(url) = &d.image_url {
    println!("  image:     {}", url);
  }
  println!("  listed:    {}", d.created_at.format("%Y-%m-%d %H:%M"));
  if !d.description.is_empty() {
    println!();
    println!("{}", d.description);
  }
}

use anyhow::Context;
use clap::{Parser, Subcommand};
use studycircle_chats::ConversationService;
use studycircle_config::load as load_config;
use studycircle_database::GroupPrivacy;
use studycircle_gateway::{create_router, BroadcastRouter, GatewayState};
use studycircle_runtime::{shutdown_signal, telemetry, BackendServices};
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser)]
#[command(name = "studycircle-server")]
#[command(about = "StudyCircle real-time messaging backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP/WebSocket server (default)
    Serve,
    /// Seed the database with demo users and a group, printing tokens
    SeedData,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server().await,
        Commands::SeedData => seed_data().await,
    }
}

async fn run_server() -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise tracing")?;

    info!("starting StudyCircle backend");

    let config = load_config().context("failed to load configuration")?;

    let services = BackendServices::initialise(&config)
        .await
        .context("failed to initialise backend services")?;

    let router = BroadcastRouter::start(
        services.redis_client.clone(),
        services.redis_conn.clone(),
        config.chat.broadcast_capacity,
    )
    .await
    .context("failed to start broadcast router")?;

    let state = GatewayState::new(
        services.db_pool.clone(),
        services.authenticator.clone(),
        router,
        config.chat.clone(),
    );
    let app = create_router(state);

    let address = format!("{}:{}", config.http.address, config.http.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind http listener on {address}"))?;

    info!(%address, "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server error")?;

    info!("backend shut down");
    Ok(())
}

async fn seed_data() -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise tracing")?;

    info!("seeding database with demo data");

    let config = load_config().context("failed to load configuration")?;

    let services = BackendServices::initialise(&config)
        .await
        .context("failed to initialise backend services")?;

    let auth = &services.authenticator;
    let conversations = ConversationService::new(services.db_pool.clone());

    let alice = auth
        .create_user(Some("alice@example.com"), Some("Alice"), None)
        .await
        .context("failed to create demo user alice")?;
    let bob = auth
        .create_user(Some("bob@example.com"), Some("Bob"), None)
        .await
        .context("failed to create demo user bob")?;

    let alice_token = auth.issue_session(alice.id).await?;
    let bob_token = auth.issue_session(bob.id).await?;

    let (group, conversation) = conversations
        .create_group("Demo Study Group", GroupPrivacy::Public, None, alice.id)
        .await
        .context("failed to create demo group")?;

    let direct = conversations
        .create_direct(alice.id, bob.id)
        .await
        .context("failed to create demo direct conversation")?;

    println!("Seeded demo data:");
    println!("  alice: user={} token={}", alice.public_id, alice_token.token);
    println!("  bob:   user={} token={}", bob.public_id, bob_token.token);
    println!("  group: {} (conversation {})", group.public_id, conversation.public_id);
    println!("  direct conversation: {}", direct.public_id);
    println!();
    println!("Connect with:");
    println!(
        "  websocat 'ws://{}:{}/ws/conversations/{}?token={}'",
        config.http.address, config.http.port, conversation.public_id, alice_token.token
    );

    Ok(())
}

//! Line-oriented console for an agent backend.
//!
//! Run with: cargo run -p agent-console-demo -- --url ws://localhost:8000/ws

use agent_console_core::{ConnectionState, ExecutionPhase, IndexOrder, Message, Projection};
use agent_console_session::{SessionConfig, SessionFacade, SessionHandle, Submission};
use agent_console_transport::websocket::WebSocketConnector;
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "agent-console")]
#[command(about = "Talk to an agent backend over its WebSocket endpoint", long_about = None)]
struct Cli {
    /// Backend WebSocket endpoint
    #[arg(long, env = "AGENT_CONSOLE_URL", default_value = agent_console_session::config::DEFAULT_URL)]
    url: String,

    /// Base URL of the HTTP execute fallback
    #[arg(long, env = "AGENT_CONSOLE_HTTP")]
    http: Option<String>,

    /// Delay between reconnect attempts, in milliseconds
    #[arg(long, default_value_t = agent_console_session::config::DEFAULT_RECONNECT_DELAY_MS)]
    reconnect_delay_ms: u64,

    /// Order in which the backend lists conversations
    #[arg(long, value_enum, default_value_t = Order::OldestFirst)]
    order: Order,
}

#[derive(Clone, Copy, ValueEnum)]
enum Order {
    OldestFirst,
    NewestFirst,
}

impl From<Order> for IndexOrder {
    fn from(order: Order) -> Self {
        match order {
            Order::OldestFirst => Self::OldestFirst,
            Order::NewestFirst => Self::NewestFirst,
        }
    }
}

impl Cli {
    fn config(&self) -> SessionConfig {
        SessionConfig {
            url: self.url.clone(),
            reconnect_delay_ms: self.reconnect_delay_ms,
            http_base: self.http.clone(),
            index_order: self.order.into(),
            ..SessionConfig::default()
        }
    }
}

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Chat(String),
    Run(String),
    Code(String),
    Http(String),
    List,
    New,
    Open(String),
    Help,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Some(Self::Chat(line.to_string()));
        };
        let (name, arg) = rest
            .split_once(char::is_whitespace)
            .map_or((rest, ""), |(n, a)| (n, a.trim()));
        let arg = arg.to_string();
        let command = match name {
            "run" if !arg.is_empty() => Self::Run(arg),
            "code" if !arg.is_empty() => Self::Code(arg),
            "http" if !arg.is_empty() => Self::Http(arg),
            "open" if !arg.is_empty() => Self::Open(arg),
            "list" => Self::List,
            "new" => Self::New,
            "quit" | "exit" => Self::Quit,
            _ => Self::Help,
        };
        Some(command)
    }
}

const HELP: &str = "\
<text>         chat in the active conversation
/run <text>    send instructions to the agent
/code <code>   execute code
/http <code>   execute code through the HTTP fallback
/list          refresh the conversation list
/new           start a new conversation
/open <id>     switch to a conversation
/quit          exit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config();
    tracing::info!("Connecting to {}", config.url);

    let (handle, driver) = SessionFacade::spawn(config, WebSocketConnector);
    handle.connect()?;

    let renderer = tokio::spawn(render(handle.subscribe()));
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Some(command) = Command::parse(&line) else {
            continue;
        };
        if !dispatch(&handle, command)? {
            break;
        }
    }

    handle.close()?;
    drop(handle);
    driver.await?;
    renderer.abort();
    Ok(())
}

/// Forward a command to the session. Returns `false` on quit.
fn dispatch(handle: &SessionHandle, command: Command) -> anyhow::Result<bool> {
    match command {
        Command::Chat(text) => handle.submit(Submission::Chat(text))?,
        Command::Run(text) => handle.submit(Submission::Instructions(text))?,
        Command::Code(code) => handle.submit(Submission::Code(code))?,
        Command::Http(code) => handle.execute_via_http(code)?,
        Command::List => handle.refresh_conversations()?,
        Command::New => handle.new_conversation()?,
        Command::Open(id) => handle.select_conversation(id)?,
        Command::Help => println!("{HELP}"),
        Command::Quit => return Ok(false),
    }
    Ok(true)
}

async fn render(mut rx: tokio::sync::watch::Receiver<Projection>) {
    let mut previous = rx.borrow_and_update().clone();
    while rx.changed().await.is_ok() {
        let current = rx.borrow_and_update().clone();
        for line in diff(&previous, &current) {
            println!("{line}");
        }
        previous = current;
    }
}

/// Lines describing what changed between two projections.
fn diff(before: &Projection, after: &Projection) -> Vec<String> {
    let mut out = Vec::new();

    if before.connection != after.connection {
        out.push(match after.connection.state {
            ConnectionState::Connecting => "[connecting]".to_string(),
            ConnectionState::Open => "[connected]".to_string(),
            ConnectionState::Closed => "[disconnected]".to_string(),
            ConnectionState::Reconnecting => {
                format!("[reconnecting, attempt {}]", after.connection.retry_count)
            }
        });
    }

    if before.conversations != after.conversations {
        out.push("Conversations:".to_string());
        for c in &after.conversations {
            let marker = if after.active_conversation.as_deref() == Some(c.id.as_str()) {
                '*'
            } else {
                ' '
            };
            out.push(format!(" {marker} {}  {}", c.id, c.summary));
        }
    }

    let fresh: &[Message] = if before.active_conversation == after.active_conversation
        && after.messages.starts_with(&before.messages)
    {
        &after.messages[before.messages.len()..]
    } else {
        if let Some(id) = &after.active_conversation {
            out.push(format!("-- conversation {id} --"));
        }
        &after.messages
    };
    for message in fresh {
        out.push(format!("{:?}: {}", message.role, message.content));
    }

    if !before.submit_rejected && after.submit_rejected {
        out.push("[submission rejected]".to_string());
    }

    if before.phase == ExecutionPhase::Executing && after.phase == ExecutionPhase::Idle {
        if let Some(code) = &after.generated_code {
            out.push(format!("Generated code:\n{code}"));
        }
        out.push(format!("Output:\n{}", after.output));
    }

    if before.plot != after.plot {
        if let Some(plot) = &after.plot {
            out.push(format!("[plot received, {} bytes]", plot.raw().len()));
        }
    }

    out
}

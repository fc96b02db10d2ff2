//! Terminal front end: talk to the chef, then save the conversation or turn
//! it into a recipe.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use uuid::Uuid;

use cheffy_client::avatar::HeadlessAvatar;
use cheffy_client::backend::HttpBackend;
use cheffy_client::config::ClientConfig;
use cheffy_client::orchestrator::MicrophoneFactory;
use cheffy_client::{Orchestrator, OrchestratorListener};
use cheffy_relay::MicrophoneCapture;
use cheffy_types::models::Conversation;

const HELP: &str = "commands: start | stop | save | recipe | retry | load <id> | quit";

struct Console {
    api_url: String,
}

impl OrchestratorListener for Console {
    fn conversation_saved(&self, conversation: &Conversation) {
        println!(
            "saved \"{}\" ({})",
            conversation.title.as_deref().unwrap_or("Untitled"),
            conversation.id
        );
    }

    fn navigate(&self, path: &str) {
        println!("recipe ready: {}{}", self.api_url, path);
    }
}

#[cfg(feature = "microphone")]
fn microphone() -> MicrophoneFactory {
    let device = std::env::var("CHEFFY_INPUT_DEVICE").ok();
    Box::new(move || Box::new(cheffy_relay::capture::CpalMicrophone::new(device.clone())) as Box<dyn MicrophoneCapture>)
}

#[cfg(not(feature = "microphone"))]
fn microphone() -> MicrophoneFactory {
    warn!("Built without the `microphone` feature; the agent will hear silence");
    Box::new(|| Box::new(cheffy_relay::ChannelMicrophone::new(16).0) as Box<dyn MicrophoneCapture>)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cheffy_client=info,cheffy_relay=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::from_env();
    let backend = HttpBackend::new(reqwest::Client::new(), &config.api_url, config.token.clone());

    let mut orchestrator = Orchestrator::new(Arc::new(backend), Arc::new(HeadlessAvatar), microphone())
        .with_agent_url(config.agent_url.clone());
    match &config.user_id {
        Some(user) => orchestrator = orchestrator.with_user(user.clone()),
        None => warn!("CHEFFY_USER_ID is not set; saving and recipes are disabled"),
    }
    orchestrator.add_listener(Arc::new(Console {
        api_url: config.api_url.clone(),
    }));

    info!("Talking to {}", config.api_url);
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = orchestrator.next_event() => {
                if let Some(event) = event {
                    print_event(&event);
                    let hung_up = event == cheffy_relay::AgentEvent::Disconnected;
                    orchestrator.handle_event(event);
                    if hung_up {
                        orchestrator.stop().await;
                    }
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !run_command(&mut orchestrator, line.trim()).await {
                    break;
                }
            }
        }
    }

    orchestrator.stop().await;
    Ok(())
}

fn print_event(event: &cheffy_relay::AgentEvent) {
    use cheffy_relay::AgentEvent;
    match event {
        AgentEvent::UserTranscript(text) => println!("you:  {}", text),
        AgentEvent::AgentResponse(text) => println!("chef: {}", text),
        AgentEvent::Disconnected => println!("(disconnected)"),
        AgentEvent::Error(e) => println!("error: {}", e),
        _ => {}
    }
}

/// Returns false when the user asked to quit.
async fn run_command(orchestrator: &mut Orchestrator, line: &str) -> bool {
    let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
    let result = match command {
        "" => Ok(()),
        "start" => orchestrator.start().await.map(|_| println!("connected, start talking")),
        "stop" => {
            orchestrator.stop().await;
            Ok(())
        }
        "save" => orchestrator.save().await.map(|_| ()),
        "recipe" => orchestrator
            .generate_recipe()
            .await
            .map(|recipe| println!("generated \"{}\"", recipe.title)),
        "retry" => orchestrator
            .retry_recipe()
            .await
            .map(|recipe| println!("generated \"{}\"", recipe.title)),
        "load" => match arg.trim().parse::<Uuid>() {
            Ok(id) => orchestrator.load(id).await.map(|_| {
                for entry in orchestrator.transcript().entries() {
                    println!("{}: {}", entry.speaker.label(), entry.text);
                }
            }),
            Err(_) => {
                println!("usage: load <conversation id>");
                Ok(())
            }
        },
        "quit" | "exit" => return false,
        _ => {
            println!("{}", HELP);
            Ok(())
        }
    };

    if let Err(e) = result {
        println!("error: {}", e);
        if orchestrator.recipe_error().is_some_and(|f| f.retryable) {
            println!("type `retry` to try again");
        }
    }
    true
}

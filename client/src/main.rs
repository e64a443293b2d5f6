use clap::{Parser, Subcommand};
use client::network::SyncClient;
use log::info;
use shared::{ClassRecord, ClassUpdate, DocRef, GameRecord, SyncMessage};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket URL of the server
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:3000")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current state, then every change as it arrives
    Watch,
    AddClass {
        doc_id: String,
        title: String,
        #[arg(default_value = "")]
        content: String,
    },
    UpdateClass {
        doc_id: String,
        content: String,
    },
    DeleteClass {
        doc_id: String,
    },
    AddGame {
        doc_id: String,
        title: String,
    },
    DeleteGame {
        doc_id: String,
    },
}

impl Command {
    fn into_mutation(self) -> Option<SyncMessage> {
        let mutation = match self {
            Command::Watch => return None,
            Command::AddClass {
                doc_id,
                title,
                content,
            } => SyncMessage::ClassAdd(ClassRecord {
                doc_id,
                title,
                content,
            }),
            Command::UpdateClass { doc_id, content } => {
                SyncMessage::ClassUpdate(ClassUpdate { doc_id, content })
            }
            Command::DeleteClass { doc_id } => SyncMessage::ClassDelete(DocRef { doc_id }),
            Command::AddGame { doc_id, title } => {
                SyncMessage::GameAdd(GameRecord { doc_id, title })
            }
            Command::DeleteGame { doc_id } => SyncMessage::GameDelete(DocRef { doc_id }),
        };
        Some(mutation)
    }
}

fn print_state(client: &SyncClient) {
    let state = client.state();
    println!("classes ({}):", state.classes.len());
    for class in &state.classes {
        println!("  [{}] {}: {}", class.doc_id, class.title, class.content);
    }
    println!("games ({}):", state.games.len());
    for game in &state.games {
        println!("  [{}] {}", game.doc_id, game.title);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut client = SyncClient::connect(&args.server).await?;

    match args.command.into_mutation() {
        Some(mutation) => {
            let kind = mutation.kind();
            client.send(mutation).await?;
            info!("Sent {}", kind);
            print_state(&client);
            client.close().await?;
        }
        None => {
            print_state(&client);
            while let Some(message) = client.recv().await? {
                println!("-- {}", message.kind());
                print_state(&client);
            }
            info!("Server closed the connection");
        }
    }

    Ok(())
}

use anyhow::{Context, Result};
use clap::Args;
use haven_chat::{ChatMessage, ProviderPreference};
use haven_core::{bootstrap, Settings};

#[derive(Args)]
pub struct ChatArgs {
    /// local, network or auto (defaults to the configured provider)
    #[arg(long)]
    pub provider: Option<ProviderPreference>,
    /// Message text
    #[arg(required = true, num_args = 1..)]
    pub message: Vec<String>,
}

pub async fn run(settings: Settings, args: ChatArgs) -> Result<()> {
    let preference = args.provider.unwrap_or(settings.chat.provider);
    let runtime = bootstrap(settings).await?;
    let history = [ChatMessage::user(args.message.join(" "))];
    let reply = runtime
        .selector
        .send(preference, &history)
        .await
        .with_context(|| format!("chat via {preference}"))?;
    eprintln!("[{}]", reply.engine);
    println!("{}", reply.text);
    Ok(())
}

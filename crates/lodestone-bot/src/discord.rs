//! Discord surface: the `/minecraft` slash command and the presence/message sink.

use std::sync::Arc;

use lodestone_instance::{InstanceGateway, Operation};
use poise::serenity_prelude as serenity;

use crate::config::Config;
use crate::lifecycle::{Interaction, Lifecycle};
use crate::monitor::{MonitorHandle, StatusMonitor};
use crate::presence::ChatSink;

pub struct Data {
    pub lifecycle: Arc<Lifecycle>,
    _monitor: MonitorHandle,
}

pub type Error = anyhow::Error;
pub type Context<'a> = poise::Context<'a, Data, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, poise::ChoiceParameter)]
pub enum OperationChoice {
    #[name = "start"]
    Start,
    #[name = "stop"]
    Stop,
    #[name = "status"]
    Status,
}

impl From<OperationChoice> for Operation {
    fn from(value: OperationChoice) -> Self {
        match value {
            OperationChoice::Start => Operation::Start,
            OperationChoice::Stop => Operation::Stop,
            OperationChoice::Status => Operation::Status,
        }
    }
}

/// Send a command to the Minecraft server
#[poise::command(slash_command)]
pub async fn minecraft(
    ctx: Context<'_>,
    #[description = "Which operation to run on the server"] operation: OperationChoice,
) -> Result<(), Error> {
    let operation = Operation::from(operation);
    tracing::debug!(%operation, user = %ctx.author().name, channel_id = %ctx.channel_id(), "called");
    ctx.data()
        .lifecycle
        .dispatch(operation, &CommandInteraction { ctx })
        .await
}

struct CommandInteraction<'a> {
    ctx: Context<'a>,
}

#[async_trait::async_trait]
impl Interaction for CommandInteraction<'_> {
    fn channel_id(&self) -> u64 {
        self.ctx.channel_id().get()
    }

    async fn reply(&self, content: &str) -> anyhow::Result<()> {
        self.ctx.say(content).await?;
        Ok(())
    }

    async fn defer(&self) -> anyhow::Result<()> {
        self.ctx.defer().await?;
        Ok(())
    }

    // After `defer`, poise sends `say` as a followup message.
    async fn followup(&self, content: &str) -> anyhow::Result<()> {
        self.ctx.say(content).await?;
        Ok(())
    }
}

/// Bot activity and channel messages through the gateway session.
#[derive(Clone)]
pub struct DiscordSink {
    ctx: serenity::Context,
}

impl DiscordSink {
    pub fn new(ctx: serenity::Context) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl ChatSink for DiscordSink {
    async fn set_activity(&self, activity: Option<String>) -> anyhow::Result<()> {
        self.ctx
            .set_activity(activity.map(serenity::ActivityData::playing));
        Ok(())
    }

    async fn send_to_channel(&self, channel_id: u64, content: &str) -> anyhow::Result<()> {
        if channel_id == 0 {
            anyhow::bail!("invalid channel id 0");
        }
        serenity::ChannelId::new(channel_id)
            .say(&self.ctx, content)
            .await?;
        Ok(())
    }
}

async fn on_error(error: poise::FrameworkError<'_, Data, Error>) {
    match error {
        poise::FrameworkError::Command { error, ctx, .. } => {
            tracing::error!(
                command = %ctx.command().name,
                error = %format!("{error:#}"),
                "command failed"
            );
            let msg = "Something went wrong while talking to the server. Please try again later.";
            if let Err(e) = ctx.say(msg).await {
                tracing::warn!(error = %e, "failed to report command error");
            }
        }
        other => {
            if let Err(e) = poise::builtins::on_error(other).await {
                tracing::error!(error = %e, "error while handling framework error");
            }
        }
    }
}

/// Connects to Discord and runs until the gateway closes or ctrl-c.
pub async fn run(config: Config, gateway: Arc<dyn InstanceGateway>) -> anyhow::Result<()> {
    let intents = serenity::GatewayIntents::non_privileged();
    let token = config.discord_token.clone();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![minecraft()],
            on_error: |error| Box::pin(on_error(error)),
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                let guilds = ready
                    .guilds
                    .iter()
                    .map(|g| g.id.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                tracing::info!(user = %ready.user.name, guilds = %guilds, "discord bot ready");

                for guild in &ready.guilds {
                    if let Err(e) =
                        poise::builtins::register_in_guild(ctx, &framework.options().commands, guild.id)
                            .await
                    {
                        tracing::error!(guild_id = %guild.id, error = %e, "failed to register commands");
                    } else {
                        tracing::debug!(guild_id = %guild.id, "registered commands");
                    }
                }

                let sink: Arc<dyn ChatSink> = Arc::new(DiscordSink::new(ctx.clone()));
                let lifecycle = Arc::new(Lifecycle::from_config(&config, gateway, sink));
                let monitor =
                    StatusMonitor::new(lifecycle.clone(), config.monitor_interval).spawn();

                Ok(Data {
                    lifecycle,
                    _monitor: monitor,
                })
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(&token, intents)
        .framework(framework)
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down");
            shard_manager.shutdown_all().await;
        }
    });

    client.start().await?;
    Ok(())
}

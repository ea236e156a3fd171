use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use shared::{
    broker::BrokerAddress,
    domain::PropId,
    protocol::{BusCommand, BusRecord, CommandRecord, Topics},
};

#[derive(Parser, Debug)]
#[command(about = "Game-master and bench tools for escape room props")]
struct Cli {
    #[arg(long, default_value = "mqtt://192.168.1.99:1883")]
    broker: String,
    #[arg(long, default_value = "ey")]
    namespace: String,
    #[arg(long, default_value = "ey1")]
    site: String,
    #[arg(long, default_value = "hollywood")]
    room: String,
    #[arg(long, default_value = "hollywood_cryptex")]
    prop: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Target {
    /// Send on the room-wide topic to every prop instead of this prop's topic.
    #[arg(long)]
    broadcast: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    ForceSolve(Target),
    Reset(Target),
    /// Print status and event records until interrupted.
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let broker = BrokerAddress::parse(&cli.broker)?;
    let prop_id = PropId::new(cli.prop.clone());
    let topics = Topics::new(&cli.namespace, &cli.site, &cli.room, &prop_id);

    let mut options = MqttOptions::new(
        format!("prop-tools-{}", std::process::id()),
        broker.host.clone(),
        broker.port,
    );
    options.set_clean_session(true);
    let (client, mut eventloop) = AsyncClient::new(options, 10);

    match cli.command {
        Command::ForceSolve(target) => {
            send_command(&client, &mut eventloop, &topics, prop_id, BusCommand::ForceSolved, target)
                .await?
        }
        Command::Reset(target) => {
            send_command(&client, &mut eventloop, &topics, prop_id, BusCommand::Reset, target)
                .await?
        }
        Command::Watch => watch(&client, &mut eventloop, &topics).await?,
    }

    Ok(())
}

async fn send_command(
    client: &AsyncClient,
    eventloop: &mut EventLoop,
    topics: &Topics,
    prop_id: PropId,
    command: BusCommand,
    target: Target,
) -> Result<()> {
    let (topic, record) = if target.broadcast {
        (&topics.broadcast_cmd, CommandRecord::new(None, command))
    } else {
        (&topics.cmd, CommandRecord::new(Some(prop_id), command))
    };
    let payload = BusRecord::Cmd(record).to_payload()?;
    client
        .publish(topic.as_str(), QoS::AtLeastOnce, false, payload)
        .await?;

    loop {
        match eventloop.poll().await.context("broker connection failed")? {
            Event::Incoming(Packet::PubAck(_)) => {
                println!("sent {} to {topic}", command.name());
                client.disconnect().await?;
            }
            Event::Outgoing(Outgoing::Disconnect) => return Ok(()),
            _ => {}
        }
    }
}

async fn watch(client: &AsyncClient, eventloop: &mut EventLoop, topics: &Topics) -> Result<()> {
    loop {
        match eventloop.poll().await.context("broker connection failed")? {
            Event::Incoming(Packet::ConnAck(_)) => {
                client
                    .subscribe(topics.status.as_str(), QoS::AtLeastOnce)
                    .await?;
                client
                    .subscribe(topics.event.as_str(), QoS::AtMostOnce)
                    .await?;
                println!("watching {} and {}", topics.status, topics.event);
            }
            Event::Incoming(Packet::Publish(publish)) => {
                println!("{}", describe(&publish.payload));
            }
            Event::Incoming(Packet::Disconnect) => {
                return Err(anyhow!("broker closed the connection"));
            }
            _ => {}
        }
    }
}

/// Anything that is not a known record is shown raw; other publishers share
/// these topics.
fn describe(payload: &[u8]) -> String {
    let Ok(record) = serde_json::from_slice::<BusRecord>(payload) else {
        return format!("[unparsed] {}", String::from_utf8_lossy(payload));
    };
    match record {
        BusRecord::Status(status) if !status.online => {
            format!("[status] {} OFFLINE", status.prop_id)
        }
        BusRecord::Status(status) => format!(
            "[status] {} ({}) solved={} override={} source={:?}",
            status.prop_id,
            status.name,
            status.solved,
            status.overridden,
            status.last_change_source
        ),
        BusRecord::Event(event) => format!(
            "[event] {} {:?} by {:?} at {}",
            event.prop_id, event.action, event.source, event.timestamp
        ),
        BusRecord::Cmd(cmd) => format!("[cmd] {}", cmd.command),
    }
}

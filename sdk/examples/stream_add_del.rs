use std::net::SocketAddr;

use clap::{Parser, ValueEnum};
use msm_dp_sdk::{DataPlane, tonic::transport::Channel};

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Operation {
    Create,
    Update,
    Delete,
    AddEp,
    UpdEp,
    DelEp,
    Health,
}

/// Sends one control plane operation to a data plane.
#[derive(Parser, Debug)]
struct Cli {
    /// data plane rpc address
    #[arg(long, default_value = "http://127.0.0.1:9000")]
    addr: String,
    #[arg(long, value_enum)]
    op: Operation,
    #[arg(long, default_value_t = 0)]
    id: u32,
    /// source endpoint for create, subscriber endpoint for the *-ep operations
    #[arg(long)]
    endpoint: Option<SocketAddr>,
    #[arg(long)]
    enable: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut client = DataPlane::new(Channel::from_shared(cli.addr)?.connect().await?);

    let endpoint = || {
        cli.endpoint
            .ok_or_else(|| anyhow::anyhow!("--endpoint is required for {:?}", cli.op))
    };

    let success = match cli.op {
        Operation::Create => client.create_stream(cli.id, endpoint()?).await?,
        Operation::Update => client.update(cli.id).await?,
        Operation::Delete => client.delete_stream(cli.id).await?,
        Operation::AddEp => client.add_endpoint(cli.id, endpoint()?, cli.enable).await?,
        Operation::UpdEp => client.update_endpoint(cli.id, endpoint()?, cli.enable).await?,
        Operation::DelEp => client.remove_endpoint(cli.id, endpoint()?).await?,
        Operation::Health => {
            println!("status: {:?}", client.health_check().await?);

            return Ok(());
        }
    };

    println!("{:?} id={}: success={success}", cli.op, cli.id);

    Ok(())
}

use anyhow::Result;
use clap::Args;
use std::sync::Arc;

use crate::config::Config;
use crate::delivery::{DeliveryService, DeliveryType, FsObjectStore, ResourceType};

#[derive(Args)]
pub struct SignArgs {
    /// Document id
    pub id: String,

    /// image, raw or auto. Probed against the origin when omitted.
    #[arg(long)]
    pub resource_type: Option<ResourceType>,

    /// upload or authenticated. Probed against the origin when omitted.
    #[arg(long)]
    pub delivery_type: Option<DeliveryType>,

    /// Print the full JSON record instead of the bare URL
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: SignArgs, config: &Config) -> Result<()> {
    let store = Arc::new(FsObjectStore::new(config.storage_root()));
    let delivery = DeliveryService::from_config(config, store)?;

    let signed = delivery
        .sign_url(&args.id, args.resource_type, args.delivery_type)
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&signed)?);
    } else {
        println!("{}", signed.url);
    }
    Ok(())
}

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tokio::runtime::Runtime;

use animica_config::AnimicaConfig;
use animica_core::to_hex;
use animica_node::{init_logging, Node};
use animica_storage::StoreError;

#[derive(Parser)]
#[command(name = "animica", version, about = "Animica devnet node CLI")]
struct Cli {
    /// Data directory; defaults to $ANIMICA_DB_DIR or the platform data dir.
    #[arg(long, global = true)]
    datadir: Option<PathBuf>,
    /// Config file; defaults are used when absent.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a devnet config file
    Init {
        #[arg(long, default_value = "config/animica.toml")]
        path: PathBuf,
    },
    /// Show head height, head hash, chain id
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Advance the chain by N devnet blocks
    Mine {
        #[arg(long, default_value_t = 1)]
        count: u64,
    },
    /// Print a block by height (decimal or 0x-hex)
    Block {
        height: String,
        #[arg(long)]
        json: bool,
    },
    /// Drain the mempool and mine K blocks
    Pipeline {
        #[arg(long, default_value_t = 1)]
        mine: u64,
        #[arg(long)]
        json: bool,
    },
    /// Toggle auto-mining
    Auto {
        state: String,
    },
    /// Run the devnet loop (auto-mines while enabled)
    Run,
}

fn load_config(cli: &Cli) -> Result<AnimicaConfig> {
    let mut cfg = match &cli.config {
        Some(path) if path.exists() => AnimicaConfig::load(path)?,
        _ => AnimicaConfig::from_env(),
    };
    if let Some(dir) = &cli.datadir {
        cfg.data_dir = Some(dir.clone());
    }
    Ok(cfg)
}

fn parse_height(s: &str) -> Result<u64> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return Ok(u64::from_str_radix(hex, 16)?);
    }
    Ok(s.parse()?)
}

fn block_json(block: &animica_core::Block) -> serde_json::Value {
    let h = &block.header;
    serde_json::json!({
        "number": format!("{:#x}", h.height),
        "hash": to_hex(&block.hash()),
        "parentHash": to_hex(&h.parent_hash),
        "coinbase": to_hex(&h.coinbase),
        "timestamp": h.timestamp,
        "stateRoot": to_hex(&h.state_root),
        "receiptsRoot": to_hex(&h.receipts_root),
        "acceptanceScalar": h.acceptance_scalar_micro,
        "proofSetDigest": to_hex(&h.proof_set_digest),
        "powDraw": h.pow_draw_micro,
        "nonce": h.nonce,
        "transactions": block
            .txs
            .iter()
            .map(|tx| tx.hash().map(|digest| to_hex(&digest)))
            .collect::<Result<Vec<_>, _>>()
            .unwrap_or_default(),
    })
}

fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Init { path } => {
            if path.exists() {
                println!("config already exists at {}", path.display());
                return Ok(());
            }
            AnimicaConfig::example().write_toml(path)?;
            println!("wrote config to {}", path.display());
        }
        Commands::Status { json } => {
            let node = Node::open(load_config(&cli)?)?;
            let status = node.status();
            if *json {
                println!("{}", serde_json::to_string(&status)?);
            } else {
                println!("height:  {}", status.height);
                println!("head:    {}", status.head_hash);
                println!("chainId: {}", status.chain_id);
            }
        }
        Commands::Mine { count } => {
            let mut node = Node::open(load_config(&cli)?)?;
            let height = node.mine(*count)?;
            println!("{height}");
        }
        Commands::Block { height, json } => {
            let node = Node::open(load_config(&cli)?)?;
            let height = parse_height(height)?;
            let block = node
                .block_by_height(height)?
                .ok_or_else(|| anyhow!("no block at height {height}"))?;
            if *json {
                println!("{}", block_json(&block));
            } else {
                println!("block {}: {}", height, to_hex(&block.hash()));
            }
        }
        Commands::Pipeline { mine, json } => {
            let mut node = Node::open(load_config(&cli)?)?;
            let summary = node.pipeline(*mine)?;
            if *json {
                println!("{}", serde_json::to_string(&summary)?);
            } else {
                println!("endHeight: {}", summary.end_height);
                println!("headHash:  {}", summary.head_hash);
            }
        }
        Commands::Auto { state } => {
            let on = match state.as_str() {
                "true" | "on" => true,
                "false" | "off" => false,
                other => return Err(anyhow!("expected true or false, got {other:?}")),
            };
            let mut node = Node::open(load_config(&cli)?)?;
            node.set_auto(on)?;
            println!("{}", if on { "on" } else { "off" });
        }
        Commands::Run => {
            init_logging();
            let mut node = Node::open(load_config(&cli)?)?;
            let rt = Runtime::new()?;
            rt.block_on(node.run())?;
        }
    }
    Ok(())
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    // 3 for IO/storage trouble, 1 for everything else; clap returns 2 for
    // bad arguments before we get here.
    for cause in err.chain() {
        if cause.downcast_ref::<StoreError>().is_some()
            || cause.downcast_ref::<std::io::Error>().is_some()
        {
            return 3;
        }
    }
    1
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heights_parse_in_decimal_and_hex() {
        assert_eq!(parse_height("12").unwrap(), 12);
        assert_eq!(parse_height("0x10").unwrap(), 16);
        assert!(parse_height("nope").is_err());
    }

    #[test]
    fn block_json_renders_hex_number() {
        let block = animica_core::Block {
            header: animica_core::BlockHeader {
                height: 1,
                parent_hash: [0; 32],
                coinbase: [0x99; 20],
                timestamp: 0,
                state_root: [0; 32],
                receipts_root: [0; 32],
                acceptance_scalar_micro: 0,
                proof_set_digest: [0; 32],
                pow_draw_micro: 0,
                nonce: 0,
            },
            txs: vec![],
        };
        let value = block_json(&block);
        assert_eq!(value["number"], "0x1");
        assert!(value["hash"].as_str().unwrap().starts_with("0x"));
    }

    #[test]
    fn storage_errors_map_to_exit_code_3() {
        let err = anyhow::Error::from(StoreError::Backend("disk on fire".into()));
        assert_eq!(exit_code_for(&err), 3);
        assert_eq!(exit_code_for(&anyhow!("generic")), 1);
    }
}

//! Follow a wallet's token accounts live and print them on every change.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use solana_sdk::{native_token::LAMPORTS_PER_SOL, pubkey::Pubkey};

use spl_account_cache::{
    config::Settings,
    rpc::solana::{SolanaPush, SolanaRemote},
    AccountCacheService, AccountRecord, SessionState,
};

#[derive(Parser, Debug)]
#[command(name = "watch_owned", about = "Print a wallet's token accounts as they change")]
struct Args {
    /// Settings file
    #[arg(long, default_value = "config/settings.json")]
    config: PathBuf,

    /// Wallet to follow (defaults to `active_wallet` from the settings file)
    #[arg(long)]
    wallet: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let settings = Settings::load_from_file(&args.config)?;
    let wallet = match args.wallet {
        Some(s) => Pubkey::from_str(&s).with_context(|| format!("--wallet {s}"))?,
        None => settings
            .active_wallet
            .ok_or_else(|| anyhow!("no wallet: pass --wallet or set active_wallet"))?,
    };

    println!("🚀 Watching {}", wallet);
    println!("📡 RPC: {}  WS: {}", settings.rpc_url, settings.ws_url);

    let remote = Arc::new(SolanaRemote::new(
        settings.rpc_url.clone(),
        settings.token_program_id,
        settings.commitment,
    ));
    let push = Arc::new(SolanaPush::connect(&settings.ws_url, settings.commitment).await?);
    let service = AccountCacheService::new(remote, push, settings.tracking_config());

    service.start_session(wallet).await?;

    let mut owned = service.watch_owned();
    let mut state = service.reconciler().watch_state();
    let first = owned.borrow_and_update().clone();
    print_owned(&service, &first).await;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!("\n🛑 Interrupted");
                break;
            }
            changed = owned.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = owned.borrow_and_update().clone();
                print_owned(&service, &snapshot).await;
            }
            changed = state.changed() => {
                if changed.is_err() || *state.borrow() == SessionState::Unsubscribed {
                    println!("❌ Subscription closed by server");
                    break;
                }
            }
        }
    }

    service.shutdown().await;
    Ok(())
}

async fn print_owned(service: &AccountCacheService, owned: &[AccountRecord]) {
    let mints: Vec<Pubkey> = owned.iter().filter(|r| !r.is_native).map(|r| r.mint).collect();
    if let Err(e) = service.cache().prefetch_mints(&mints).await {
        println!("⚠️ Mint prefetch failed: {}", e);
    }

    println!("\n📊 {} owned records", owned.len());
    for record in owned {
        if record.is_native && record.raw_meta.is_empty() {
            println!(
                "   SOL {:>20.9}  (native)",
                record.balance as f64 / LAMPORTS_PER_SOL as f64
            );
            continue;
        }
        let amount = match service.get_mint(record.mint).await {
            Ok(mint) => format!("{:>20}", spl_token::amount_to_ui_amount(record.balance, mint.decimals)),
            Err(e) => format!("{:>20} (raw, {})", record.balance, e),
        };
        let frozen = if record.is_frozen { " ❄️" } else { "" };
        println!("   {} {}  mint {}{}", record.key, amount, record.mint, frozen);
    }
}

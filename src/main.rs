use color_eyre::eyre::{
    Result,
    eyre,
};
use lottery_dapp::{
    client,
    deployment::{
        self,
        AddressOverrides,
        DeploymentEnv,
        DeploymentStore,
    },
    wallets,
};
use tracing_appender::rolling;
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

const LOG_DIR: &str = "logs";
const LOG_FILE: &str = "lottery-dapp.log";

fn print_usage_and_exit() -> ! {
    println!(
        "Usage: lottery-dapp [--devnet | --testnet | --local] [--rpc-url <url>]\n\
         [--wallet <name>] [--wallet-dir <path>]\n\
         [--token <address>] [--lottery <address>] [--dealer <address>] [--save-deployment]\n\
         \n\
         Flags:\n\
           --devnet            Connect to the devnet (default RPC {})\n\
           --testnet           Connect to the testnet (default RPC {})\n\
           --local             Connect to a local node (default RPC {})\n\
           --rpc-url <url>     Override the RPC URL for the selected network\n\
           --wallet <name>     Keystore wallet to play with\n\
           --wallet-dir <path> Override the wallet directory (defaults to ~/.lottery/wallets)\n\
           --token <address>   Mock ERC20 token address (defaults to the latest deployment record)\n\
           --lottery <address> Lottery contract address (defaults to the latest deployment record)\n\
           --dealer <address>  Dealer account address (defaults to the latest deployment record)\n\
           --save-deployment   Record the given addresses as the latest deployment for the network",
        client::DEFAULT_DEVNET_RPC_URL,
        client::DEFAULT_TESTNET_RPC_URL,
        client::DEFAULT_LOCAL_RPC_URL,
    );
    std::process::exit(0);
}

fn set_once(slot: &mut Option<String>, flag: &str, value: Option<String>) -> Result<()> {
    let value = value.ok_or_else(|| eyre!("{flag} requires an argument"))?;
    if slot.is_some() {
        return Err(eyre!("{flag} may only be specified once"));
    }
    *slot = Some(value);
    Ok(())
}

fn parse_cli_args() -> Result<client::AppConfig> {
    let mut args = std::env::args().skip(1);
    let mut network_flag: Option<DeploymentEnv> = None;
    let mut custom_url: Option<String> = None;
    let mut wallet_dir: Option<String> = None;
    let mut wallet_name: Option<String> = None;
    let mut overrides = AddressOverrides::default();
    let mut save_deployment = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--devnet" | "--testnet" | "--local" => {
                if network_flag.is_some() {
                    return Err(eyre!(
                        "Multiple network flags provided; choose one of --devnet/--testnet/--local"
                    ));
                }
                network_flag = Some(match arg.as_str() {
                    "--devnet" => DeploymentEnv::Dev,
                    "--testnet" => DeploymentEnv::Test,
                    _ => DeploymentEnv::Local,
                });
            }
            "--rpc-url" => {
                if network_flag.is_none() {
                    return Err(eyre!(
                        "--rpc-url must follow a network flag (--devnet/--testnet/--local)"
                    ));
                }
                set_once(&mut custom_url, "--rpc-url", args.next())?;
            }
            "--wallet-dir" => set_once(&mut wallet_dir, "--wallet-dir", args.next())?,
            "--wallet" => set_once(&mut wallet_name, "--wallet", args.next())?,
            "--token" => set_once(&mut overrides.token, "--token", args.next())?,
            "--lottery" => set_once(&mut overrides.lottery, "--lottery", args.next())?,
            "--dealer" => set_once(&mut overrides.dealer, "--dealer", args.next())?,
            "--save-deployment" => save_deployment = true,
            "--help" | "-h" => print_usage_and_exit(),
            other => return Err(eyre!("Unknown argument: {other}")),
        }
    }

    let env = network_flag.ok_or_else(|| {
        eyre!("Select a network with --devnet, --testnet, or --local")
    })?;
    let network = match env {
        DeploymentEnv::Dev => client::NetworkTarget::Devnet {
            url: custom_url.unwrap_or_else(|| client::DEFAULT_DEVNET_RPC_URL.to_string()),
        },
        DeploymentEnv::Test => client::NetworkTarget::Testnet {
            url: custom_url
                .unwrap_or_else(|| client::DEFAULT_TESTNET_RPC_URL.to_string()),
        },
        DeploymentEnv::Local => client::NetworkTarget::LocalNode {
            url: custom_url.unwrap_or_else(|| client::DEFAULT_LOCAL_RPC_URL.to_string()),
        },
    };

    let store = DeploymentStore::new(env)?;
    let addresses = deployment::resolve_addresses(&store, &overrides)?;
    if save_deployment {
        deployment::record_overrides(&store, &overrides, &addresses, network.url())?;
    }

    // Without a wallet the client still starts; connecting reports the gap.
    let wallet = match wallet_name {
        Some(name) => client::WalletConfig::Keystore {
            name,
            dir: wallets::resolve_wallet_dir(wallet_dir.as_deref())?,
        },
        None => client::WalletConfig::None,
    };

    Ok(client::AppConfig {
        network,
        wallet,
        addresses,
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(rolling::daily(LOG_DIR, LOG_FILE))
        .with_ansi(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();
    tracing::info!("starting lottery-dapp client");
    deployment::ensure_structure()?;
    let app_config = parse_cli_args()?;
    client::run_app(app_config).await
}

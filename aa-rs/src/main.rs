use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use ethers::prelude::*;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use userop_aa::config::{load_network, Network};
use userop_aa::encoding;
use userop_aa::{
    AccountCall, BundlerClient, Call, ChainReader, ContextSponsorClient, GasPriceSupplier,
    PartialUserOperation, PolicySponsorClient, ProviderChain, ScaledGasPrice, SimpleAccount,
    SimpleAccountConfig, SmartAccount, SmartAccountClient, SponsorContext, SponsorSupplier,
    UserOpMiddleware, UserOperation, UserOperationRequest,
};

#[derive(Parser, Debug)]
#[command(name = "userop-aa", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the counterfactual smart account address, deployment status and nonce.
    Account(AccountArgs),

    /// Resolve every field of a UserOperation and print it without signing.
    Prepare(TxArgs),

    /// Prepare, sign and submit a UserOperation to the bundler.
    Send(SendArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Network description (chainId, rpc, entryPoint, factory, bundler, paymaster).
    #[arg(long, default_value = "networks/base-sepolia.json")]
    network: PathBuf,

    /// Override the chain RPC URL (otherwise uses the network JSON).
    #[arg(long, env = "USEROP_AA_RPC_URL")]
    rpc: Option<String>,

    /// Smart account owner private key.
    #[arg(long, env = "USEROP_AA_OWNER_PRIVATE_KEY", hide_env_values = true)]
    owner_private_key: String,

    /// CREATE2 salt for the smart account.
    #[arg(long, default_value_t = 0)]
    salt: u64,

    /// Use this account address instead of asking the factory.
    #[arg(long)]
    account: Option<String>,
}

#[derive(Args, Debug)]
struct AccountArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Print a single JSON object to stdout instead of human-readable lines.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SponsorMode {
    /// The account pays its own gas.
    None,
    /// Sponsor selected by policy id.
    Policy,
    /// Sponsor repaid in an ERC-20 token.
    Erc20token,
    /// Pay-as-you-go sponsor.
    Payg,
}

#[derive(Args, Debug)]
struct TxArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Call for the account to execute: `<to>[,<valueWei>[,<data>]]`. Repeat to batch.
    #[arg(long = "call", value_parser = parse_call, required_unless_present = "call_data")]
    calls: Vec<Call>,

    /// Raw account callData (skips execute/executeBatch encoding).
    #[arg(long, conflicts_with = "calls")]
    call_data: Option<String>,

    /// Bundler RPC URL (otherwise uses the network JSON).
    #[arg(long, env = "USEROP_AA_BUNDLER_URL")]
    bundler: Option<String>,

    /// Who pays for gas.
    #[arg(long, value_enum, default_value_t = SponsorMode::None)]
    sponsor: SponsorMode,

    /// Sponsor RPC URL (otherwise uses the network JSON).
    #[arg(long, env = "USEROP_AA_PAYMASTER_URL")]
    paymaster_url: Option<String>,

    /// Sponsorship policy id for `--sponsor policy`.
    #[arg(long, env = "USEROP_AA_SPONSORSHIP_POLICY_ID")]
    policy_id: Option<String>,

    /// Token for `--sponsor erc20token`.
    #[arg(long)]
    token: Option<String>,

    /// Price both fee fields at node gas price times this many basis points
    /// (e.g. 15000 = 1.5x). Without it the node's EIP-1559 estimate is used.
    #[arg(long, env = "USEROP_AA_GAS_MULTIPLIER_BPS")]
    gas_multiplier_bps: Option<u64>,
}

#[derive(Args, Debug)]
struct SendArgs {
    #[command(flatten)]
    tx: TxArgs,

    /// Do not send the UserOperation; only prepare it.
    #[arg(long)]
    dry_run: bool,

    /// Do not wait for the userOp receipt.
    #[arg(long)]
    no_wait: bool,

    /// Max seconds to wait for userOp receipt. Use 0 to disable timeout.
    #[arg(long, default_value_t = 180)]
    max_wait_seconds: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        // stdout is reserved for results
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Account(args) => cmd_account(args).await,
        Command::Prepare(args) => cmd_prepare(args).await,
        Command::Send(args) => cmd_send(args).await,
    }
}

/// Everything a command needs once the network and owner are known.
struct Session {
    network: Network,
    provider: Arc<Provider<Http>>,
    chain: Arc<dyn ChainReader>,
    account: Arc<SimpleAccount<LocalWallet>>,
}

async fn open_session(common: &CommonArgs) -> Result<Session> {
    let network = load_network(&common.network, common.rpc.clone())?;

    let provider = Arc::new(
        Provider::<Http>::try_from(network.rpc_url.as_str())?.interval(Duration::from_millis(350)),
    );
    let chain: Arc<dyn ChainReader> = Arc::new(ProviderChain::new(provider.clone()));
    network.ensure_chain_id(chain.chain_id().await?)?;

    let wallet = LocalWallet::from_str(&common.owner_private_key)
        .context("invalid owner private key")?
        .with_chain_id(network.chain_id);

    let address = common
        .account
        .as_deref()
        .map(Address::from_str)
        .transpose()
        .context("invalid --account address")?;

    let account = SimpleAccount::new(
        chain.clone(),
        wallet,
        SimpleAccountConfig {
            factory: network.factory,
            entry_point: network.entry_point,
            salt: U256::from(common.salt),
            address,
        },
    )
    .await?;

    Ok(Session {
        network,
        provider,
        chain,
        account: Arc::new(account),
    })
}

async fn cmd_account(args: AccountArgs) -> Result<()> {
    let session = open_session(&args.common).await?;
    let account = &session.account;

    let nonce = account.get_nonce().await?;
    let factory = account.get_factory().await?;
    let deployed = factory.is_none();
    let balance = session
        .provider
        .get_balance(account.address(), None)
        .await
        .context("failed to fetch account balance")?;

    if args.json {
        let out = serde_json::json!({
            "owner": encoding::fmt_address(account.owner()),
            "smartAccount": encoding::fmt_address(account.address()),
            "deployed": deployed,
            "nonce": encoding::fmt_u256(nonce),
            "balance": encoding::fmt_u256(balance),
            "factory": factory.map(encoding::fmt_address),
        });
        println!("{}", out);
        return Ok(());
    }

    println!("owner:        {}", encoding::fmt_address(account.owner()));
    println!("smartAccount: {}", encoding::fmt_address(account.address()));
    println!("deployed:     {}", deployed);
    println!("nonce:        {}", nonce);
    println!("balance:      {} wei", balance);
    Ok(())
}

async fn cmd_prepare(args: TxArgs) -> Result<()> {
    let session = open_session(&args.common).await?;
    let (client, request) = build_request(&session, &args)?;

    let op = client.prepare_user_operation(request).await?;
    print_prepared(&session, &op).await
}

async fn cmd_send(args: SendArgs) -> Result<()> {
    let session = open_session(&args.tx.common).await?;
    let (client, request) = build_request(&session, &args.tx)?;

    if args.dry_run {
        let op = client.prepare_user_operation(request).await?;
        print_prepared(&session, &op).await?;
        eprintln!("--dry-run set: not sending user operation.");
        return Ok(());
    }

    let user_op_hash = client.send_user_operation(request).await?;
    println!("{}", encoding::fmt_h256(user_op_hash));

    if args.no_wait {
        eprintln!("--no-wait set: not waiting for receipt.");
        return Ok(());
    }

    let bundler = BundlerClient::new(bundler_url(&session.network, &args.tx)?);
    let receipt = bundler
        .wait_for_user_operation_receipt(
            user_op_hash,
            Duration::from_secs(2),
            Duration::from_secs(args.max_wait_seconds),
        )
        .await
        .context("failed waiting for userOp receipt")?;

    eprintln!("UserOp receipt:\n{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

fn build_request(
    session: &Session,
    args: &TxArgs,
) -> Result<(SmartAccountClient, UserOperationRequest)> {
    let bundler = Arc::new(BundlerClient::new(bundler_url(&session.network, args)?));

    let gas_price = args.gas_multiplier_bps.map(|bps| {
        Arc::new(ScaledGasPrice::new(session.chain.clone(), bps)) as Arc<dyn GasPriceSupplier>
    });
    let middleware = UserOpMiddleware::stages(gas_price, sponsor(&session.network, args)?);

    let call_data = match args.call_data.as_deref() {
        Some(raw) => encoding::parse_bytes(raw).context("invalid --call-data")?,
        None => session.account.encode_call_data(&account_call(&args.calls)?)?,
    };

    let client = SmartAccountClient::with_bundler(session.chain.clone(), bundler)
        .with_account(session.account.clone())
        .with_middleware(middleware);

    Ok((
        client,
        UserOperationRequest::new(PartialUserOperation::new(call_data)),
    ))
}

fn account_call(calls: &[Call]) -> Result<AccountCall> {
    match calls {
        [] => Err(anyhow!("at least one --call is required")),
        [call] => Ok(AccountCall::Single(call.clone())),
        calls => Ok(AccountCall::Batch(calls.to_vec())),
    }
}

fn bundler_url(network: &Network, args: &TxArgs) -> Result<String> {
    args.bundler
        .clone()
        .or_else(|| network.bundler_url.clone())
        .ok_or_else(|| anyhow!("missing bundler URL: pass --bundler (or USEROP_AA_BUNDLER_URL)"))
}

fn sponsor(network: &Network, args: &TxArgs) -> Result<Option<Arc<dyn SponsorSupplier>>> {
    if args.sponsor == SponsorMode::None {
        return Ok(None);
    }

    let url = args
        .paymaster_url
        .clone()
        .or_else(|| network.paymaster_url.clone())
        .ok_or_else(|| {
            anyhow!("--sponsor requires --paymaster-url (or USEROP_AA_PAYMASTER_URL)")
        })?;

    let sponsor: Arc<dyn SponsorSupplier> = match args.sponsor {
        SponsorMode::None => return Ok(None),
        SponsorMode::Policy => Arc::new(PolicySponsorClient::new(url, args.policy_id.clone())),
        SponsorMode::Erc20token => {
            let token = args
                .token
                .as_deref()
                .ok_or_else(|| anyhow!("--sponsor erc20token requires --token"))?;
            let token = Address::from_str(token).context("invalid --token address")?;
            Arc::new(ContextSponsorClient::new(
                url,
                SponsorContext::Erc20Token { token },
            ))
        }
        SponsorMode::Payg => Arc::new(ContextSponsorClient::new(url, SponsorContext::Payg)),
    };
    Ok(Some(sponsor))
}

async fn print_prepared(session: &Session, op: &UserOperation) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(&encoding::user_op_to_json(op))?
    );

    let prefund = op.required_prefund();
    eprintln!("required prefund: {} wei", prefund);

    if op.paymaster_and_data.is_empty() {
        let balance = session
            .provider
            .get_balance(op.sender, None)
            .await
            .context("failed to fetch account balance")?;
        if balance < prefund {
            tracing::warn!(
                %balance,
                %prefund,
                "account balance is below the required prefund; the bundler will reject this operation"
            );
        }
    }
    Ok(())
}

fn parse_call(s: &str) -> Result<Call, String> {
    let mut parts = s.splitn(3, ',');
    let to = parts
        .next()
        .ok_or_else(|| "empty call".to_string())?
        .trim()
        .parse::<Address>()
        .map_err(|e| format!("invalid call target: {e}"))?;
    let value = match parts.next().map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => U256::from_dec_str(v).map_err(|e| format!("invalid call value: {e}"))?,
        None => U256::zero(),
    };
    let data = match parts.next().map(str::trim).filter(|v| !v.is_empty()) {
        Some(d) => encoding::parse_bytes(d).map_err(|e| format!("invalid call data: {e}"))?,
        None => Bytes::default(),
    };
    Ok(Call { to, value, data })
}

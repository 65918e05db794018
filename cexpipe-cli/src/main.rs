//! cexpipe CLI: market data, candles and order commands.
//!
//! Commands:
//! - `price`, `book`, `candles`: public market data
//! - `balances`, `orders`, `place`, `cancel`, `cancel-all`, `auth`: account
//!   operations, using credentials from `CEXPIPE_API_KEY` / `CEXPIPE_API_SECRET`
//! - `demo`: price, top of book and the last ten daily candles in one go
//! - `worker` (hidden): one isolated request attempt, spawned by `--process`

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

use cexpipe_core::channel::RetryPolicy;
use cexpipe_core::config::IsolationMode;
use cexpipe_core::domain::{OrderRequest, Side};
use cexpipe_core::worker::run_worker;
use cexpipe_core::{
    CexConfig, Channel, ChannelKey, Credentials, Exchange, HttpTransport, Market, Nonce, Pair,
};

#[derive(Parser)]
#[command(name = "cexpipe", about = "cexpipe: durable exchange requests and clean candles")]
struct Cli {
    /// Exchange: binance, bitfinex, coinbase, kraken, kucoin.
    #[arg(long, global = true, default_value = "binance")]
    exchange: String,

    /// Market as ASSET:CURRENCY.
    #[arg(long, global = true, default_value = "BTC:USD")]
    pair: String,

    /// TOML config file. Defaults apply when absent.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run every attempt in a separate worker process.
    #[arg(long, global = true, default_value_t = false)]
    process: bool,

    /// Debug logging.
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Market(MarketCommand),
    /// One isolated attempt: reads a wire request on stdin.
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        channel_dir: PathBuf,

        #[arg(long)]
        nonce: Nonce,
    },
}

#[derive(Subcommand)]
enum MarketCommand {
    /// Last traded price.
    Price,
    /// Order book, best level first.
    Book {
        #[arg(long, default_value_t = 10)]
        depth: usize,
    },
    /// Gap-free candles on (start, end].
    Candles {
        /// Candle width in seconds.
        #[arg(long, default_value_t = 86400)]
        interval: i64,

        /// Exclusive start, unix seconds or YYYY-MM-DD.
        #[arg(long)]
        start: Option<String>,

        /// Inclusive end, unix seconds or YYYY-MM-DD. Defaults to now.
        #[arg(long)]
        end: Option<String>,
    },
    /// Account balances for both legs of the pair.
    Balances,
    /// Open orders in the market.
    Orders,
    /// Place one limit order.
    Place {
        #[arg(value_enum)]
        side: SideArg,
        amount: f64,
        price: f64,
    },
    /// Cancel orders by id.
    Cancel {
        #[arg(required = true)]
        order_ids: Vec<String>,
    },
    /// Cancel every open order in the market.
    CancelAll,
    /// Check that the credentials work.
    Auth,
    /// Price, top of book and the last ten daily candles.
    Demo,
}

#[derive(Clone, Copy, ValueEnum)]
enum SideArg {
    Buy,
    Sell,
}

impl From<SideArg> for Side {
    fn from(side: SideArg) -> Self {
        match side {
            SideArg::Buy => Side::Buy,
            SideArg::Sell => Side::Sell,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let exchange: Exchange = cli.exchange.parse()?;
    let pair: Pair = cli.pair.parse()?;
    let config = load_config(cli.config.as_deref(), cli.process)?;

    let command = match cli.command {
        Commands::Worker { channel_dir, nonce } => {
            let code = run_worker_cmd(&config, exchange, &pair, &channel_dir, nonce)?;
            std::process::exit(code);
        }
        Commands::Market(command) => command,
    };

    let transport = Arc::new(HttpTransport::new(config.executor.timeout())?);
    let market = Market::from_config(exchange, config, transport, Credentials::from_env())?;
    run_market_cmd(&market, &pair, command)
}

fn run_market_cmd(market: &Market, pair: &Pair, command: MarketCommand) -> Result<()> {
    let exchange = market.exchange().to_string();
    match command {
        MarketCommand::Price => print(&json!({
            "exchange": exchange,
            "pair": pair.to_string(),
            "price": market.price(pair)?,
        })),
        MarketCommand::Book { depth } => print(&market.book(pair, depth)?),
        MarketCommand::Candles {
            interval,
            start,
            end,
        } => {
            let start = start.as_deref().map(parse_time).transpose()?;
            let end = end.as_deref().map(parse_time).transpose()?;
            print(&market.candles(pair, interval, start, end)?)
        }
        MarketCommand::Balances => print(&market.balances(pair)?),
        MarketCommand::Orders => print(&market.open_orders(pair)?),
        MarketCommand::Place {
            side,
            amount,
            price,
        } => {
            if amount <= 0.0 || price <= 0.0 {
                bail!("amount and price must be positive");
            }
            let order = OrderRequest {
                side: side.into(),
                amount,
                price,
            };
            print(&market.place_order(pair, order)?)
        }
        MarketCommand::Cancel { order_ids } => print(&market.cancel(pair, &order_ids)?),
        MarketCommand::CancelAll => print(&market.cancel_all(pair)?),
        MarketCommand::Auth => {
            let ok = market.authenticate(pair);
            print(&json!({ "exchange": exchange, "authenticated": ok }))?;
            if !ok {
                std::process::exit(1);
            }
            Ok(())
        }
        MarketCommand::Demo => run_demo(market, pair),
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn load_config(path: Option<&std::path::Path>, process: bool) -> Result<CexConfig> {
    let mut config = match path {
        Some(path) => CexConfig::from_file(path)?,
        None => CexConfig::default(),
    };
    if process {
        config.executor.isolation = IsolationMode::Process;
        config.executor.worker_program =
            Some(std::env::current_exe().context("cannot locate the cexpipe executable")?);
        config.executor.worker_args = vec!["worker".into()];
    }
    config.validate()?;
    Ok(config)
}

fn run_worker_cmd(
    config: &CexConfig,
    exchange: Exchange,
    pair: &Pair,
    channel_dir: &std::path::Path,
    nonce: Nonce,
) -> Result<i32> {
    let transport = HttpTransport::new(config.executor.timeout())?;
    let channel = Channel::new(channel_dir, RetryPolicy::from(&config.channel));
    let key = ChannelKey::new(exchange, pair, nonce);
    Ok(run_worker(std::io::stdin().lock(), &transport, &channel, &key))
}

fn run_demo(market: &Market, pair: &Pair) -> Result<()> {
    let price = market.price(pair)?;
    let book = market.book(pair, 5)?;
    let candles = market.candles(pair, 86400, None, None)?;
    println!("{} {pair}", market.exchange());
    println!("  last price:  {price}");
    println!(
        "  best bid/ask: {} / {}",
        fmt_level(book.best_bid()),
        fmt_level(book.best_ask())
    );
    println!("  daily candles: {}", candles.len());
    for candle in &candles.candles {
        println!(
            "    {}  o {:>12.4}  h {:>12.4}  l {:>12.4}  c {:>12.4}  v {:>14.4}",
            candle.unix, candle.open, candle.high, candle.low, candle.close, candle.volume
        );
    }
    Ok(())
}

fn fmt_level(level: Option<f64>) -> String {
    level.map_or_else(|| "-".into(), |p| p.to_string())
}

/// Unix seconds, or a `YYYY-MM-DD` date at midnight UTC.
fn parse_time(s: &str) -> Result<i64> {
    if let Ok(unix) = s.parse::<i64>() {
        return Ok(unix);
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("'{s}' is neither unix seconds nor YYYY-MM-DD"))?;
    Ok(date.and_time(NaiveTime::MIN).and_utc().timestamp())
}

fn print<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

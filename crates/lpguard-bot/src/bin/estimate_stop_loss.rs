//! Stop-loss calculator.
//!
//! Prints where a stop placed `fraction` of the way down a range would
//! trigger, what it costs in impermanent loss, and the dump band above it.

use anyhow::{bail, Result};
use clap::Parser;
use lpguard_core::{
    big_to_decimal, dump_band, loss_estimation, BigDecimal, DumpBand, LossEstimate, Price,
};
use rust_decimal::Decimal;
use serde::Serialize;

/// Estimate the impermanent loss of a stop-loss inside an LP range
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Top of the range (quote per base)
    #[arg(long)]
    top: Decimal,

    /// Bottom of the range (quote per base)
    #[arg(long)]
    bottom: Decimal,

    /// Fraction of the range, from the top, at which to exit
    #[arg(long, default_value = "0.6")]
    fraction: Decimal,

    /// Impermanent-loss multiplier for the dump band
    #[arg(long, default_value = "2")]
    dump_factor: Decimal,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct Report {
    top: Price,
    bottom: Price,
    fraction: Decimal,
    estimate: LossEstimate,
    band: DumpBand,
}

fn build_report(args: &Args) -> Result<Report> {
    if args.bottom <= Decimal::ZERO || args.top <= args.bottom {
        bail!("need 0 < bottom < top, got bottom={} top={}", args.bottom, args.top);
    }
    if args.fraction <= Decimal::ZERO || args.fraction >= Decimal::ONE {
        bail!("fraction must be in (0, 1), got {}", args.fraction);
    }

    let top = Price::new(args.top);
    let bottom = Price::new(args.bottom);
    let estimate = loss_estimation(&top, &bottom, args.fraction)?;
    let band = dump_band(&top, &bottom, args.fraction, args.dump_factor)?;

    Ok(Report {
        top,
        bottom,
        fraction: args.fraction,
        estimate,
        band,
    })
}

fn rounded(value: &BigDecimal, dp: u32) -> Result<Decimal> {
    Ok(big_to_decimal(value)?.round_dp(dp).normalize())
}

fn render_text(report: &Report) -> Result<String> {
    let e = &report.estimate;
    Ok(format!(
        "range:            {} - {} ({}% wide)\n\
         exit fraction:    {}\n\
         exit price:       {}\n\
         impermanent loss: {}%\n\
         loss on 1000:     {}\n\
         loss on 5000:     {}\n\
         dump price:       {}",
        rounded(report.bottom.as_big(), 6)?,
        rounded(report.top.as_big(), 6)?,
        rounded(&e.range_percent, 2)?,
        report.fraction,
        rounded(e.exit_price.as_big(), 6)?,
        rounded(&e.imp_loss_percent, 4)?,
        rounded(&e.imp_loss_1000, 2)?,
        rounded(&e.imp_loss_5000, 2)?,
        rounded(report.band.dump_price.as_big(), 6)?,
    ))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let report = build_report(&args)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", render_text(&report)?);
    }
    Ok(())
}

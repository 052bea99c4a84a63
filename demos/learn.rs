//! Building, learning and training SPNs from the command line.
//!
//! Run with:
//! ```bash
//! cargo run --example learn -- literal
//! cargo run --example learn -- csv data.csv --epochs 20 --save model.spn
//! ```
//!
//! The CSV must have a header line of variable names followed by rows of 0/1
//! values.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use log::info;

use spn_rs::cluster::GaussianMixture;
use spn_rs::data::Dataset;
use spn_rs::spn::Spn;
use spn_rs::structure::{LeafEncoding, SplitPolicy, StructureConfig};
use spn_rs::weights::{DegeneratePolicy, TrainConfig};

#[derive(Debug, Parser)]
#[command(author, version, about = "Sum-Product Network demo")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Number of hard-EM epochs
    #[arg(long, default_value = "10", global = true)]
    epochs: usize,

    /// Random seed for initial weights and structure learning
    #[arg(long, default_value = "0", global = true)]
    seed: u64,

    /// Keep the weights of Sum nodes that receive no counts
    #[arg(long, global = true)]
    preserve: bool,

    /// Write the trained graph to this file
    #[arg(long, global = true)]
    save: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evaluate and train the fixed two-variable network
    Literal,
    /// Learn a structure from a CSV file, then train it
    Csv {
        path: PathBuf,

        #[arg(long, value_enum, default_value = "alternate")]
        policy: Policy,

        /// Upper bound on mixture components per split
        #[arg(long, default_value = "4")]
        max_components: usize,
    },
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum Policy {
    Alternate,
    Random,
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let cli = Cli::parse();
    let config = TrainConfig {
        epochs: cli.epochs,
        degenerate: if cli.preserve {
            DegeneratePolicy::Preserve
        } else {
            DegeneratePolicy::Zero
        },
        ..TrainConfig::default()
    };

    let time_total = std::time::Instant::now();

    let spn = match &cli.command {
        Command::Literal => literal(cli.seed, &config)?,
        Command::Csv {
            path,
            policy,
            max_components,
        } => {
            let data = Dataset::from_csv_str(&std::fs::read_to_string(path)?)?;
            info!("{}: {} rows, {} columns", path.display(), data.n_rows(), data.n_cols());
            learn(&data, cli.seed, *policy, *max_components, &config)?
        }
    };

    if let Some(path) = &cli.save {
        spn.save(path)?;
        println!("saved to {}", path.display());
    }

    println!("total time: {:.3} s", time_total.elapsed().as_secs_f64());
    Ok(())
}

fn literal(seed: u64, config: &TrainConfig) -> color_eyre::Result<Spn> {
    let mut spn = Spn::with_seed(seed);
    let x1 = spn.add_leaf("x1")?;
    let x1_ = spn.add_leaf("x1_")?;
    let x2 = spn.add_leaf("x2")?;
    let x2_ = spn.add_leaf("x2_")?;
    let s1 = spn.add_sum_with_weights("s1", &[(x1, 0.8), (x1_, 0.2)])?;
    let s2 = spn.add_sum_with_weights("s2", &[(x1, 0.6), (x1_, 0.4)])?;
    let s3 = spn.add_sum_with_weights("s3", &[(x2, 0.3), (x2_, 0.7)])?;
    let s4 = spn.add_sum_with_weights("s4", &[(x2, 0.4), (x2_, 0.6)])?;
    let p1 = spn.add_product("p1", &[s1, s3])?;
    let p2 = spn.add_product("p2", &[s2, s4])?;
    let s5 = spn.add_sum_with_weights("s5", &[(p1, 0.35), (p2, 0.65)])?;
    println!("spn = {:?}", spn);
    println!("{}", spn.to_bracket_string(s5));

    let vars = ["x1", "x2"];
    spn.set_evidence(&vars, &[true, false], &config.negation_suffix)?;
    println!("P(x1, !x2) = {}", spn.evaluate(false)?);
    println!("max(x1, !x2) = {}", spn.evaluate(true)?);
    spn.accumulate_counts()?;
    for id in spn.sum_nodes() {
        let node = spn.node(id);
        let counts: Vec<String> = node
            .links()
            .iter()
            .map(|l| format!("{}={}", spn.node(l.child).name(), l.count))
            .collect();
        println!("- {}: {}", node.name(), counts.join(" "));
    }
    spn.normalize_counts(config.degenerate)?;

    let rows = vec![
        vec![true, true],
        vec![true, false],
        vec![true, false],
        vec![false, false],
    ];
    let scores = spn.fit(&vars, &rows, config)?;
    info!("scores per epoch: {:?}", scores);
    println!("log-likelihood = {}", spn.log_likelihood(&vars, &rows, &config.negation_suffix)?);
    println!("{}", spn.to_bracket_string(s5));
    Ok(spn)
}

fn learn(
    data: &Dataset,
    seed: u64,
    policy: Policy,
    max_components: usize,
    config: &TrainConfig,
) -> color_eyre::Result<Spn> {
    let structure = StructureConfig {
        policy: match policy {
            Policy::Alternate => SplitPolicy::Alternate,
            Policy::Random => SplitPolicy::Random,
        },
        leaf_encoding: LeafEncoding::Indicators,
        negation_suffix: config.negation_suffix.clone(),
        seed,
        ..StructureConfig::default()
    };
    let mut gmm = GaussianMixture::with_seed(seed);
    gmm.max_components = max_components;

    let time_learn = std::time::Instant::now();
    let mut spn = Spn::learn(data, &mut gmm, &structure)?;
    println!(
        "learned {} nodes in {:.3} s",
        spn.len(),
        time_learn.elapsed().as_secs_f64()
    );

    let vars = data.column_names().to_vec();
    let rows = data.bool_rows();
    println!(
        "log-likelihood before training = {}",
        spn.log_likelihood(&vars, &rows, &config.negation_suffix)?
    );
    let scores = spn.fit(&vars, &rows, config)?;
    info!("scores per epoch: {:?}", scores);
    println!(
        "log-likelihood after training = {}",
        spn.log_likelihood(&vars, &rows, &config.negation_suffix)?
    );
    Ok(spn)
}

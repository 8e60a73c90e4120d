//! recsys - train, evaluate and query the movie recommenders
//!
//! Configuration comes from `config/recsys.*` and `RECSYS__*` environment
//! variables; flags given on the command line take precedence.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use media_recsys::data::{load_items, load_ratings};
use media_recsys::{
    evaluate, ranking_metrics, split, CollaborativeFilteringModel, ItemId, MatrixFactorization,
    Rating, RecommenderEngine, RecsysConfig, ScoredItem,
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "recsys", version, about = "Movie recommendation engine")]
struct Cli {
    /// Directory for saved models (overrides configuration)
    #[arg(long, env = "RECSYS_MODELS_DIR", global = true)]
    models_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit every model on the full rating table and save it
    Train {
        #[arg(long)]
        ratings: PathBuf,
        #[arg(long)]
        items: PathBuf,
    },
    /// Fit on the earliest ratings and report error on the rest
    Evaluate {
        #[arg(long)]
        ratings: PathBuf,
        #[arg(long, value_enum, default_value_t = Model::Collaborative)]
        model: Model,
        /// Share of ratings used for training (overrides configuration)
        #[arg(long)]
        train_fraction: Option<f64>,
    },
    /// Print the top-N recommendations for one user
    Recommend {
        #[arg(long)]
        ratings: PathBuf,
        #[arg(long)]
        items: PathBuf,
        #[arg(long)]
        user: u32,
        #[arg(long, short, default_value_t = 10)]
        n: usize,
        #[arg(long, value_enum, default_value_t = Model::Collaborative)]
        model: Model,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Model {
    Collaborative,
    Content,
    Factorization,
}

#[derive(Serialize)]
struct Recommendation {
    item_id: ItemId,
    title: Option<String>,
    score: f64,
}

fn main() -> Result<()> {
    media_recsys::config::load_dotenv();
    let cli = Cli::parse();

    let mut config = RecsysConfig::load().context("Failed to load configuration")?;
    if let Some(dir) = cli.models_dir {
        config.models_dir = dir;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).json().init();

    match cli.command {
        Command::Train { ratings, items } => train(config, ratings, items),
        Command::Evaluate {
            ratings,
            model,
            train_fraction,
        } => {
            if let Some(fraction) = train_fraction {
                config.split.train_fraction = fraction;
            }
            run_evaluation(config, ratings, model)
        }
        Command::Recommend {
            ratings,
            items,
            user,
            n,
            model,
        } => recommend(config, ratings, items, user, n, model),
    }
}

fn train(config: RecsysConfig, ratings: PathBuf, items: PathBuf) -> Result<()> {
    let ratings = load_ratings(&ratings)
        .with_context(|| format!("Failed to read ratings from {}", ratings.display()))?;
    let items =
        load_items(&items).with_context(|| format!("Failed to read items from {}", items.display()))?;

    let models_dir = config.models_dir.clone();
    let engine = RecommenderEngine::new(config).context("Invalid configuration")?;
    engine.fit(&ratings, &items).context("Failed to fit models")?;
    engine
        .save(&models_dir)
        .with_context(|| format!("Failed to save models to {}", models_dir.display()))?;

    info!("Models saved to {}", models_dir.display());
    Ok(())
}

fn run_evaluation(config: RecsysConfig, ratings: PathBuf, model: Model) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    let ratings = load_ratings(&ratings)
        .with_context(|| format!("Failed to read ratings from {}", ratings.display()))?;

    let time_split = split(&ratings, config.split.train_fraction).context("Failed to split ratings")?;
    info!(
        "Split at timestamp {}: {} train / {} test",
        time_split.boundary,
        time_split.train.len(),
        time_split.test.len()
    );

    let predictions = match model {
        Model::Collaborative => {
            CollaborativeFilteringModel::fit(&time_split.train, config.collaborative.clone())
                .context("Failed to fit collaborative model")?
                .predict_ratings(&time_split.test)
        }
        Model::Factorization => {
            MatrixFactorization::fit(&time_split.train, config.factorization.clone())
                .context("Failed to fit factorization model")?
                .predict(&time_split.test)
                .context("Failed to score held-out ratings")?
        }
        Model::Content => {
            anyhow::bail!("content-based model ranks items and does not predict ratings")
        }
    };

    let report = evaluate(&predictions).context("Failed to evaluate predictions")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn recommend(
    config: RecsysConfig,
    ratings: PathBuf,
    items: PathBuf,
    user: u32,
    n: usize,
    model: Model,
) -> Result<()> {
    let ratings = load_ratings(&ratings)
        .with_context(|| format!("Failed to read ratings from {}", ratings.display()))?;
    let items =
        load_items(&items).with_context(|| format!("Failed to read items from {}", items.display()))?;

    let models_dir = config.models_dir.clone();
    let engine = RecommenderEngine::new(config).context("Invalid configuration")?;
    engine
        .load_or_fit(&models_dir, &ratings, &items)
        .context("Failed to load or fit models")?;

    let context = engine.context(user)?;
    let (scored, ranked): (Vec<(ItemId, f64)>, Option<Vec<ScoredItem>>) = match model {
        Model::Collaborative => {
            let top = context.collaborative_top_n(n)?;
            (top.iter().map(|s| (s.item_id, s.score)).collect(), Some(top))
        }
        Model::Factorization => {
            let top = context.factorization_top_n(n)?;
            (top.iter().map(|s| (s.item_id, s.score)).collect(), Some(top))
        }
        Model::Content => {
            let nearest = context.content_top_n(n)?;
            let pairs = nearest
                .iter()
                .map(|neighbor| (neighbor.item_id, f64::from(neighbor.distance)))
                .collect();
            (pairs, None)
        }
    };

    if let Some(top) = ranked {
        let user_ratings: Vec<Rating> = ratings.iter().filter(|r| r.user_id == user).copied().collect();
        let ranking = ranking_metrics(&top, &user_ratings);
        info!(
            "Top-{} for user {}: precision {:.3}, recall {:.3}, f1 {:.3}",
            n, user, ranking.precision, ranking.recall, ranking.f1
        );
    }

    let titles: HashMap<ItemId, &str> = items
        .iter()
        .map(|item| (item.item_id, item.title.as_str()))
        .collect();
    let recommendations: Vec<Recommendation> = scored
        .iter()
        .map(|&(item_id, score)| Recommendation {
            item_id,
            title: titles.get(&item_id).map(|t| t.to_string()),
            score,
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&recommendations)?);
    Ok(())
}

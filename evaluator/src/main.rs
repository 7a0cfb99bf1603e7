use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use evaluator::pipeline::{Method, RetrievalSettings};
use evaluator::reference::TrecEval;
use evaluator::runfiles::{fuse_run_files, judged_query_ids, score_run_file};
use evaluator::{cross_check, evaluate, report, EvalConfig, QrelsSource};
use retrieval::config::{
    Bm25Params, RrfParams, BM25_B, BM25_K1, DEFAULT_KS, HNSW_DEFAULT_EF_SEARCH, REFERENCE_EVAL_TIMEOUT_SECS, RETRIEVAL_DEPTH,
    RRF_K, RRF_TOP_N,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "evaluator")]
#[command(about = "Evaluate lexical, dense and hybrid passage retrieval", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct FusionArgs {
    /// RRF constant k in 1 / (k + rank)
    #[arg(long, default_value_t = RRF_K)]
    rrf_k: f64,
    /// Length of each fused list
    #[arg(long, default_value_t = RRF_TOP_N)]
    top_n: usize,
}

impl FusionArgs {
    fn params(&self) -> Result<RrfParams> {
        let params = RrfParams { k: self.rrf_k, top_n: self.top_n };
        params.validate()?;
        Ok(params)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve with every method over every variant, score, and write reports
    Run {
        /// Directory holding one index directory per variant
        #[arg(long, env = "RETRIEVAL_INDEX_ROOT", default_value = "./index")]
        index_root: PathBuf,
        /// Variants to evaluate
        #[arg(long = "variant", default_values_t = evaluator::DEFAULT_VARIANTS.map(String::from))]
        variants: Vec<String>,
        /// Queries TSV (`query_id<TAB>text`)
        #[arg(long, env = "RETRIEVAL_QUERIES")]
        queries: PathBuf,
        /// Query vectors as JSON lines
        #[arg(long, env = "RETRIEVAL_QUERY_VECTORS")]
        query_vectors: Option<PathBuf>,
        /// Named qrels set as `name=path` (repeatable)
        #[arg(long = "qrels", value_parser = QrelsSource::parse)]
        qrels: Vec<QrelsSource>,
        #[arg(long, default_value = "./results")]
        output: PathBuf,
        #[arg(long = "method", value_enum, default_values_t = Method::ALL)]
        methods: Vec<Method>,
        /// Metric cutoffs
        #[arg(long = "k", default_values_t = DEFAULT_KS)]
        ks: Vec<usize>,
        /// Evaluate only the first N queries
        #[arg(long)]
        query_limit: Option<usize>,
        #[arg(long, default_value_t = RETRIEVAL_DEPTH)]
        depth: usize,
        #[arg(long, default_value_t = BM25_K1)]
        k1: f64,
        #[arg(long, default_value_t = BM25_B)]
        b: f64,
        #[arg(long, default_value_t = HNSW_DEFAULT_EF_SEARCH)]
        ef_search: usize,
        #[command(flatten)]
        fusion: FusionArgs,
        /// Reference evaluator binary; the cross-check is skipped without it
        #[arg(long, env = "TREC_EVAL_BIN")]
        trec_eval: Option<PathBuf>,
        /// Measures passed to the reference evaluator as `-m <measure>`
        #[arg(long = "measure")]
        measures: Vec<String>,
        #[arg(long, default_value_t = REFERENCE_EVAL_TIMEOUT_SECS)]
        trec_eval_timeout: u64,
    },
    /// Fuse existing run files with reciprocal rank fusion
    Fuse {
        /// Input run file (repeatable)
        #[arg(long = "run", required = true)]
        runs: Vec<PathBuf>,
        /// Keep only queries judged in these qrels files
        #[arg(long = "qrels")]
        qrels: Vec<PathBuf>,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value = "hybrid")]
        run_tag: String,
        #[command(flatten)]
        fusion: FusionArgs,
    },
    /// Score an existing run file against a qrels file
    Score {
        #[arg(long)]
        run: PathBuf,
        #[arg(long)]
        qrels: PathBuf,
        #[arg(long = "k", default_values_t = DEFAULT_KS)]
        ks: Vec<usize>,
        /// Include per-query metrics in the output
        #[arg(long, default_value_t = false)]
        per_query: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            index_root,
            variants,
            queries,
            query_vectors,
            qrels,
            output,
            methods,
            ks,
            query_limit,
            depth,
            k1,
            b,
            ef_search,
            fusion,
            trec_eval,
            measures,
            trec_eval_timeout,
        } => {
            let bm25 = Bm25Params { k1, b };
            bm25.validate()?;
            let rrf = fusion.params()?;
            let mut config = EvalConfig::new(index_root, queries, output);
            config.variants = variants;
            config.query_vectors = query_vectors;
            config.qrels = qrels;
            config.methods = methods;
            config.ks = ks;
            config.query_limit = query_limit;
            config.settings = RetrievalSettings { depth, bm25, ef_search, rrf };

            let config = std::sync::Arc::new(config);
            let worker = config.clone();
            let mut eval_report = tokio::task::spawn_blocking(move || evaluate(&worker)).await??;

            if let Some(binary) = trec_eval {
                let reference = TrecEval::new(binary)
                    .with_measures(measures)
                    .with_timeout(Duration::from_secs(trec_eval_timeout));
                cross_check(&mut eval_report, &reference, &config.qrels).await;
            }

            report::write_all(&config.output_dir, &eval_report)?;
            print!("{}", report::render_markdown(&eval_report));
            Ok(())
        }
        Commands::Fuse { runs, qrels, output, run_tag, fusion } => {
            let only = judged_query_ids(&qrels)?;
            let summary = fuse_run_files(&runs, only.as_ref(), &fusion.params()?, &output, &run_tag)?;
            tracing::info!(inputs = summary.inputs, queries = summary.queries, lines = summary.lines, "fusion complete");
            Ok(())
        }
        Commands::Score { run, qrels, ks, per_query } => {
            let mut result = score_run_file(&run, &qrels, &ks)?;
            if !per_query {
                result.per_query.clear();
            }
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}

//! Researches a question on the web from the terminal and prints an answer
//! with its sources.

#[macro_use]
extern crate tracing;

use std::env;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use pro_search::SessionBuilder;
use pro_search::core::{ResearchConfig, ResearchEvent, ResearchResult, Stage};
use pro_search_exa::ExaConfigBuilder;
use pro_search_openai_model::OpenAIConfigBuilder;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const BAR_CHAR: &str = "▎";

/// Researches a question on the web and answers it with cited sources.
#[derive(Debug, Parser)]
#[command(name = "pro-search", version)]
struct Args {
    /// The question to research.
    question: String,

    /// Number of search queries in the first wave.
    #[arg(long, value_name = "N")]
    initial_queries: Option<usize>,

    /// Maximum number of follow-up search waves.
    #[arg(long, value_name = "N")]
    max_loops: Option<u32>,

    /// Model used for writing the final answer.
    #[arg(long, value_name = "MODEL")]
    answer_model: Option<String>,

    /// Prints the full result as JSON instead of formatted text.
    #[arg(long)]
    json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let Ok(api_key) = env::var("OPENAI_API_KEY") else {
        eprintln!("OPENAI_API_KEY environment variable is not set");
        return ExitCode::FAILURE;
    };
    let Ok(exa_api_key) = env::var("EXA_API_KEY") else {
        eprintln!("EXA_API_KEY environment variable is not set");
        return ExitCode::FAILURE;
    };
    let mut config = match ResearchConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(count) = args.initial_queries {
        config = config.with_initial_queries(count);
    }
    if let Some(loops) = args.max_loops {
        config = config.with_max_research_loops(loops);
    }

    let openai_builder = {
        let mut builder = OpenAIConfigBuilder::with_api_key(api_key);
        if let Ok(base_url) = env::var("OPENAI_BASE_URL") {
            builder = builder.with_base_url(base_url);
        }
        builder
    };
    let model_builder = match env::var("OPENAI_MODEL") {
        Ok(model) => openai_builder.clone().with_model(model),
        Err(_) => openai_builder.clone(),
    };
    let answer_model = args
        .answer_model
        .clone()
        .or_else(|| env::var("OPENAI_ANSWER_MODEL").ok());

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let mut session_builder = SessionBuilder::with_providers(
        model_builder.build(),
        ExaConfigBuilder::with_api_key(exa_api_key).build(),
    )
    .with_config(config)
    .on_event(move |event| {
        event_tx.send(event.clone()).ok();
    });
    if let Some(answer_model) = answer_model {
        session_builder = session_builder
            .with_answer_model(openai_builder.with_model(answer_model).build());
    }
    let session = match session_builder.build() {
        Ok(session) => session,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("interrupted, cancelling the research run");
                cancel.cancel();
            }
        }
    });

    let progress_bar = if args.json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
    progress_bar.set_style(progress_style);
    progress_bar.set_message("🤔 Planning search queries...");

    let research = session.ask(&args.question, cancel);
    tokio::pin!(research);

    let result = loop {
        progress_bar.inc(1);

        let sleep = sleep(Duration::from_millis(100));
        select! {
            result = &mut research => break result,
            Some(event) = event_rx.recv() => {
                if !args.json {
                    show_event(&progress_bar, &event);
                }
            },
            _ = sleep => {}
        }
    };
    progress_bar.finish_and_clear();

    if args.json {
        match serde_json::to_string_pretty(&result) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                eprintln!("failed to encode the result: {err}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        print_result(&result);
    }

    if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn show_event(progress_bar: &ProgressBar, event: &ResearchEvent) {
    match event {
        ResearchEvent::StageChanged { stage, loop_count } => {
            let message = match stage {
                Stage::Planning => "🤔 Planning search queries...".to_owned(),
                Stage::Searching if *loop_count == 0 => {
                    "🔎 Searching the web...".to_owned()
                }
                Stage::Searching => {
                    format!("🔎 Searching the web (follow-up {loop_count})...")
                }
                Stage::Reflecting => "🧐 Looking for knowledge gaps...".to_owned(),
                Stage::Finalizing => "✍️  Writing the answer...".to_owned(),
                Stage::Done | Stage::Failed => return,
            };
            progress_bar.set_message(message);
        }
        ResearchEvent::QueriesPlanned { queries } => {
            progress_bar.suspend(|| {
                for query in queries {
                    println!("{}🔎 {}", BAR_CHAR.bright_cyan(), query.text.bright_white());
                }
            });
        }
        ResearchEvent::SearchFinished { query, success, .. } => {
            if !success {
                progress_bar.suspend(|| {
                    println!(
                        "{}⚠️  search failed: {}",
                        BAR_CHAR.bright_yellow(),
                        query.bright_white()
                    );
                });
            }
        }
        ResearchEvent::Reflected { sufficient, gaps } => {
            if !sufficient {
                progress_bar.suspend(|| {
                    for gap in gaps {
                        println!("{}🧩 {}", BAR_CHAR.bright_magenta(), gap.dimmed());
                    }
                });
            }
        }
        ResearchEvent::AnswerDelta { .. } | ResearchEvent::AnswerReady => {}
    }
}

fn print_result(result: &ResearchResult) {
    if !result.success {
        let detail = result.error_detail.as_deref().unwrap_or("unknown error");
        eprintln!("{}❌ research failed: {}", BAR_CHAR.bright_red(), detail);
        if !result.citations.is_empty() {
            eprintln!(
                "{}{} sources were gathered before the failure",
                BAR_CHAR.bright_red(),
                result.citations.len()
            );
        }
        return;
    }

    println!();
    println!("{}", result.answer.bright_white());
    println!();
    if !result.sources.is_empty() {
        println!("{}", "Sources".bold());
        for source in &result.sources {
            let title = if source.title.is_empty() {
                source.url.as_str()
            } else {
                source.title.as_str()
            };
            println!(
                "{}[{}] {} {}",
                BAR_CHAR.bright_cyan(),
                source.short_id,
                title.bright_white(),
                source.url.dimmed()
            );
        }
    }
    println!(
        "{}",
        format!(
            "{} queries, {} follow-up loops",
            result.queries.len(),
            result.loop_count_used
        )
        .dimmed()
    );
}

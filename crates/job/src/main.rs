use clap::Parser;

use adprompt_job::cli::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    adprompt_observability::init(args.log_format);

    adprompt_job::app::run(args).await
}

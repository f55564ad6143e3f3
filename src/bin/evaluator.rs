use anyhow::Result;

fn main() -> Result<()> {
    function_evaluator::cli::run(function_evaluator::cli::CliMode::Evaluator)
}

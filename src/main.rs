fn main() -> anyhow::Result<()> {
    jobs_tui::cli::run()
}

use clap::Parser;

fn main() -> miette::Result<()> {
    termfit::App::parse().run()
}

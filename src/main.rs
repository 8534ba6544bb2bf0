use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use posts_tui::app::App;

const HELP: &str = "posts-tui - Read, write and discuss posts from the terminal.

  --version, -V            Show version and exit
  --help,    -h            Show this help message
  --logout                 Forget the stored session and exit
  --whoami                 Print the logged-in user and exit
  --export-html <path>     Write the post archive as HTML and exit
  --page <n>               Page to export (0-based, default 0)";

fn main() {
    match handle_cli_flags() {
        Ok(true) => return,
        Ok(false) => {}
        Err(err) => {
            eprintln!("error: {err:?}");
            std::process::exit(2);
        }
    }

    if let Err(err) = posts_tui::run() {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn handle_cli_flags() -> anyhow::Result<bool> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut saw_flag = false;
    let mut export: Option<PathBuf> = None;
    let mut page: u32 = 0;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("posts-tui {}", posts_tui::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!("{HELP}");
                saw_flag = true;
            }
            "--logout" => {
                saw_flag = true;
                logout()?;
            }
            "--whoami" => {
                saw_flag = true;
                whoami()?;
            }
            "--export-html" => {
                saw_flag = true;
                let path = iter
                    .next()
                    .ok_or_else(|| anyhow!("--export-html needs a file path"))?;
                export = Some(PathBuf::from(path));
            }
            "--page" => {
                let raw = iter.next().ok_or_else(|| anyhow!("--page needs a number"))?;
                page = raw
                    .parse()
                    .with_context(|| format!("invalid page number {raw:?}"))?;
            }
            other if other.starts_with('-') => bail!("unknown flag {other} (see --help)"),
            _ => {}
        }
    }

    if let Some(path) = export {
        export_html(&path, page)?;
    }
    Ok(saw_flag)
}

fn logout() -> anyhow::Result<()> {
    let app = App::bootstrap()?;
    app.session.clear()?;
    println!("Logged out.");
    Ok(())
}

fn whoami() -> anyhow::Result<()> {
    let app = App::bootstrap()?;
    match app.session.claims() {
        Some(claims) => {
            let name = claims.username.unwrap_or_else(|| "(unknown user)".to_string());
            match claims.email {
                Some(email) => println!("{name} <{email}>"),
                None => println!("{name}"),
            }
            if app.session.is_expired(chrono::Utc::now()) {
                println!("Session expired; log in again.");
            }
        }
        None if app.session.is_authenticated() => println!("Logged in (token has no user claims)."),
        None => println!("Not logged in."),
    }
    Ok(())
}

fn export_html(path: &Path, page: u32) -> anyhow::Result<()> {
    let app = App::bootstrap()?;
    app.refresh_if_expired();
    let count = app.export_html(path, page)?;
    println!("Wrote {count} posts to {}", path.display());
    Ok(())
}

use anyhow::Context;
use shipwright_core::{config::Config, io, paths};
use std::path::Path;

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing shipwright in: {}", root.display());

    for dir in [paths::SHIPWRIGHT_DIR, paths::CYCLES_DIR] {
        let p = root.join(dir);
        std::fs::create_dir_all(&p).with_context(|| format!("failed to create {}", p.display()))?;
    }

    if paths::config_path(root).exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
    } else {
        Config::default()
            .save(root)
            .context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
    }

    // Cycle records and generated sources stay out of the project's history.
    io::ensure_gitignore_entry(root, &format!("{}/", paths::CYCLES_DIR))
        .context("failed to update .gitignore")?;

    let config = Config::load(root)?;
    if Config::has_errors(&config.validate()) {
        println!();
        println!("Next: set collaborators.default in {} and run `shipwright config check`.", paths::CONFIG_FILE);
    }
    Ok(())
}

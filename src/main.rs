use std::path::PathBuf;

use branch_mesh::{write_obj, TreeConfig};

const DEFAULT_CONFIG: &str = "assets/tree.toml";
const DEFAULT_OUTPUT: &str = "tree.obj";

fn usage() -> ! {
    eprintln!("usage: branch-mesh [config.toml] [out.obj] [--seed N]");
    std::process::exit(2);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut paths = Vec::new();
    let mut seed = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--seed" => match args.next().and_then(|s| s.parse::<u64>().ok()) {
                Some(s) => seed = Some(s),
                None => usage(),
            },
            "-h" | "--help" => usage(),
            _ => paths.push(PathBuf::from(arg)),
        }
    }
    if paths.len() > 2 {
        usage();
    }
    let mut paths = paths.into_iter();
    let config_path = paths.next().unwrap_or_else(|| DEFAULT_CONFIG.into());
    let output = paths.next().unwrap_or_else(|| DEFAULT_OUTPUT.into());

    let mut config = TreeConfig::load(&config_path)?;
    if let Some(seed) = seed {
        config.seed = seed;
    }
    log::info!("growing {} with seed {}", config_path.display(), config.seed);

    let (tree, mesh) = config.build()?;
    log::info!(
        "{} branches, {} vertices, {} triangles",
        tree.branch_count(),
        mesh.vertex_count(),
        mesh.triangle_count()
    );
    write_obj(&mesh, &output)?;
    log::info!("wrote {}", output.display());
    Ok(())
}

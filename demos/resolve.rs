use std::path::PathBuf;
use std::sync::mpsc;

use desktop_icons::{IconDispatcher, IconLocation, ResolverConfig, get_icon_base64_by_path};
use tracing_subscriber::EnvFilter;

// cargo run --example resolve -- <path> [icon-file,index]
fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("desktop_icons=debug,info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let path = PathBuf::from(
        args.next()
            .unwrap_or_else(|| "C:\\Windows\\System32\\notepad.exe".to_owned()),
    );
    let icon_override = args.next().map(|loc| loc.parse::<IconLocation>().unwrap());

    let _ = std::fs::create_dir("output");

    let dispatcher = IconDispatcher::new(ResolverConfig::default());
    let (tx, rx) = mpsc::channel();
    dispatcher.request_icon(&path, icon_override, move |icon| {
        let _ = tx.send(icon);
    });
    dispatcher.shutdown();

    match rx.try_recv() {
        Ok(icon) => {
            icon.to_rgba_image().save("output/icon.png").unwrap();
            println!("{} -> output/icon.png ({}px)", path.display(), icon.size());
        }
        Err(_) => println!("{}: no icon", path.display()),
    }

    match get_icon_base64_by_path(&path) {
        Ok(base64) => println!("base64: {}...", &base64[..base64.len().min(64)]),
        Err(e) => println!("base64: {e}"),
    }
}

use anyhow::Result;

use super::LibraryArgs;

pub fn run(args: &LibraryArgs) -> Result<()> {
    let library = args.load()?;

    if library.is_empty() && library.bad_maps().is_empty() {
        println!("No .map files found in: {}", library.root().display());
        return Ok(());
    }

    println!("{:<10} {:<32} {:>8} {:>44}", "ID", "TITLE", "M/PX", "BOUNDS");
    println!("{}", "-".repeat(97));
    for map in library.maps() {
        println!(
            "{:<10} {:<32} {:>8.2} {:>44}",
            map.id,
            truncate(&map.title, 32),
            map.absolute_mpp(),
            map.bounds().to_string()
        );
    }

    if !library.bad_maps().is_empty() {
        println!();
        println!("Bad maps:");
        for map in library.bad_maps() {
            println!(
                "  {}: {}",
                map.path.display(),
                map.load_error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    // Summary
    println!();
    println!("Summary:");
    println!("  Maps: {}", library.len());
    if !library.bad_maps().is_empty() {
        println!("  Bad maps: {}", library.bad_maps().len());
    }
    println!("  Maps directory: {}", library.root().display());

    Ok(())
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(width - 1).collect();
        out.push('~');
        out
    }
}

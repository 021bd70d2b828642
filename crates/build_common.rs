// Shared build script helper for README-to-rustdoc generation.
// Include in a crate's build.rs with: include!("../build_common.rs");
//
// The including file must import:
//   use std::env;
//   use std::fs;
//   use std::path::Path;

/// Copy the crate's README.md into OUT_DIR so lib.rs can embed it as the
/// crate-level doc comment via `include_str!`.
///
/// The file is always written (empty if no README exists) so that the
/// `include_str!` in lib.rs never fails to resolve.
fn generate_readme_doc(crate_dir: &str) {
    println!("cargo:rerun-if-changed=README.md");

    let readme_path = Path::new(crate_dir).join("README.md");
    let content = fs::read_to_string(&readme_path).unwrap_or_default();

    let out_dir = env::var("OUT_DIR").expect("OUT_DIR is set by cargo");
    let dest = Path::new(&out_dir).join("README_GENERATED.md");
    fs::write(dest, content).expect("write README_GENERATED.md");
}

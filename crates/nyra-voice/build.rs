use std::env;
use std::fs;
use std::path::Path;

include!("../build_common.rs");

fn main() {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR is set by cargo");
    generate_readme_doc(&manifest_dir);
    println!("cargo:rerun-if-changed=build.rs");
}

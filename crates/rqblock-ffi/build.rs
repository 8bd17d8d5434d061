use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=src");

    let crate_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => dir,
        Err(_) => return,
    };
    let out_dir = match env::var("OUT_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => return,
    };

    // Header generation is best-effort; the library builds without it
    let generated = cbindgen::Builder::new()
        .with_crate(crate_dir)
        .with_language(cbindgen::Language::C)
        .with_include_guard("RQ_LIBRARY_H")
        .with_header("/* rq-library C API. This header is auto-generated. Do not edit directly. */")
        .with_sys_include("stdbool.h")
        .with_sys_include("stdint.h")
        .with_cpp_compat(true)
        .generate();

    match generated {
        Ok(bindings) => {
            bindings.write_to_file(out_dir.join("rq-library.h"));
        }
        Err(e) => println!("cargo:warning=rq-library.h not generated: {e}"),
    }
}

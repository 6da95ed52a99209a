//! Stamps the binary with the commit it was built from, shown by `--version`.

fn main() {
    // Source tarballs and vendored builds have no repository to ask.
    let revision = match grev::git_revision_auto(".") {
        Ok(Some(revision)) => revision,
        Ok(None) | Err(_) => String::from("unknown"),
    };
    println!("cargo:rustc-env=GIT_REVISION={revision}");
}

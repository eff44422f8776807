//! The Coco binary.
//!
//! Coco listens for collectd datagrams, filters them by a blacklist and forwards every data set to
//! one backend per configured tier, chosen by consistent hashing of the host name.
//!
//! ```text
//! coco run [CONFIG]            start the router, CONFIG defaults to coco.yml
//! coco config show [CONFIG]    print the effective configuration
//! ```
//!
//! See the `coco-server` crate for the architecture of the router.

mod cli;
mod setup;

use std::process;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            coco_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

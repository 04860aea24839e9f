#![deny(warnings)]
#![deny(clippy::unwrap_used)]

//! Print a fresh master key for `GATEWAY_MASTER_KEY`.

use ssh_gateway::gateway::vault::MasterKey;

fn main() {
    let key = MasterKey::generate(1);
    println!("{}", key.to_base64());
}

#![no_main]

use aspectweave::{file, resolver::Resolver, weaver::Weaver};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(mut module) = file::module_from_bytes(data.to_vec()) else {
        return;
    };
    if let Ok(resolver) = Resolver::new() {
        let _ = Weaver::new(&resolver).weave(&mut module);
    }
});

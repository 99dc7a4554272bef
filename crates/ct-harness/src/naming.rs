//! Ephemeral test database names
//!
//! Names look like `test_<network>_<spec>_<unix_seconds>_<suffix>` where the
//! suffix is eight random hex digits, or the last six digits of the current
//! nanosecond clock if the OS random source fails.

use rand::rngs::OsRng;
use rand::TryRngCore;
use std::collections::BTreeSet;
use std::sync::Mutex;

/// Prefix shared by every generated name
pub const NAME_PREFIX: &str = "test_";

/// Names handed out during the current second
struct Issued {
    second: i64,
    names: BTreeSet<String>,
}

impl Issued {
    const fn new() -> Self {
        Self {
            second: i64::MIN,
            names: BTreeSet::new(),
        }
    }

    /// Second to stamp the next name with. Never moves backwards; moving
    /// forward forgets the names of earlier seconds.
    fn advance(&mut self, now: i64) -> i64 {
        if now > self.second {
            self.second = now;
            self.names.clear();
        }
        self.second
    }
}

static ISSUED: Mutex<Issued> = Mutex::new(Issued::new());

/// Replace characters that are awkward in identifiers with `_`
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn random_suffix() -> String {
    let mut bytes = [0u8; 4];
    match OsRng.try_fill_bytes(&mut bytes) {
        Ok(()) => bytes.iter().map(|b| format!("{b:02x}")).collect(),
        Err(e) => {
            log::warn!("OS random source failed ({}), using clock suffix", e);
            let nanos = chrono::Utc::now().timestamp_subsec_nanos();
            format!("{:06}", nanos % 1_000_000)
        }
    }
}

/// Generate a database name for `network` and `spec`.
///
/// Names are never repeated within a process; across processes the random
/// suffix and timestamp keep collisions negligible.
pub fn generate_name(network: &str, spec: &str) -> String {
    let network = sanitize(network);
    let spec = sanitize(spec);
    let mut issued = ISSUED.lock().unwrap_or_else(|p| p.into_inner());
    let seconds = issued.advance(chrono::Utc::now().timestamp());
    loop {
        let name = format!(
            "{NAME_PREFIX}{network}_{spec}_{seconds}_{}",
            random_suffix()
        );
        if issued.names.insert(name.clone()) {
            return name;
        }
    }
}

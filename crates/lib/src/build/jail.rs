//! Jailed command execution.
//!
//! Wraps a build command in a bubblewrap (`bwrap`) sandbox: the build
//! directory is bound read-write, the host toolchain directories read-only,
//! and `/tmp` is a fresh tmpfs. Requires the `bwrap` binary on the host.

use std::path::Path;

/// Host directories exposed read-only inside the jail.
const RO_BINDS: &[&str] = &["/usr", "/bin", "/sbin", "/lib", "/lib64", "/etc", "/opt"];

pub(crate) fn wrap(argv: &[String], build_dir: &Path) -> Vec<String> {
  let dir = build_dir.to_string_lossy().to_string();

  let mut wrapped: Vec<String> = vec![
    "bwrap".into(),
    "--die-with-parent".into(),
    "--dev".into(),
    "/dev".into(),
    "--proc".into(),
    "/proc".into(),
    "--tmpfs".into(),
    "/tmp".into(),
  ];

  for bind in RO_BINDS {
    if Path::new(bind).exists() {
      wrapped.push("--ro-bind".into());
      wrapped.push((*bind).into());
      wrapped.push((*bind).into());
    }
  }

  wrapped.push("--bind".into());
  wrapped.push(dir.clone());
  wrapped.push(dir.clone());
  wrapped.push("--chdir".into());
  wrapped.push(dir);

  wrapped.extend(argv.iter().cloned());
  wrapped
}

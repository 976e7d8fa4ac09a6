//! Code fragments executed on the device.
//!
//! Every remote filesystem operation is a short CircuitPython program built
//! here and run through the raw REPL. Fragments that produce a value print
//! exactly one JSON line on stdout; mutating fragments print nothing and
//! succeed by producing empty stderr. Binary data crosses the wire as hex,
//! never as raw bytes, so control characters cannot collide with the REPL
//! protocol.

use std::fmt::Write as _;

/// One remote filesystem request, rendered to device code by [`render`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Directory listing with per-entry stat: `[[name, mode, size, mtime]]`.
    List { path: String },
    /// Single stat: `[mode, size, mtime]`.
    Stat { path: String },
    /// Bounded read of `len` bytes at `offset`, printed as a hex line.
    ReadBlock {
        path: String,
        offset: usize,
        len: usize,
    },
    /// Truncate-and-write the first block of a file.
    WriteNew { path: String, data: Vec<u8> },
    /// Append a subsequent block.
    WriteAppend { path: String, data: Vec<u8> },
    Mkdir { path: String },
    /// Recursive removal of a file or directory tree.
    Remove { path: String },
    Rename { from: String, to: String },
}

impl Request {
    /// Operation name used in error reports.
    pub fn op(&self) -> &'static str {
        match self {
            Request::List { .. } => "list",
            Request::Stat { .. } => "stat",
            Request::ReadBlock { .. } => "read",
            Request::WriteNew { .. } => "write",
            Request::WriteAppend { .. } => "append",
            Request::Mkdir { .. } => "mkdir",
            Request::Remove { .. } => "remove",
            Request::Rename { .. } => "rename",
        }
    }

    /// Primary path the request touches, for error reports.
    pub fn path(&self) -> &str {
        match self {
            Request::List { path }
            | Request::Stat { path }
            | Request::ReadBlock { path, .. }
            | Request::WriteNew { path, .. }
            | Request::WriteAppend { path, .. }
            | Request::Mkdir { path }
            | Request::Remove { path } => path,
            Request::Rename { from, .. } => from,
        }
    }

    /// Render the device-side program for this request.
    pub fn render(&self) -> Vec<u8> {
        let code = match self {
            Request::List { path } => format!(
                "import os, json\n\
                 p = {p}\n\
                 out = []\n\
                 for n in os.listdir(p):\n\
                 \x20   s = os.stat((p if p != '/' else '') + '/' + n)\n\
                 \x20   out.append([n, s[0], s[6], int(s[8])])\n\
                 print(json.dumps(out))\n",
                p = py_str(path)
            ),
            Request::Stat { path } => format!(
                "import os, json\n\
                 s = os.stat({p})\n\
                 print(json.dumps([s[0], s[6], int(s[8])]))\n",
                p = py_str(path)
            ),
            Request::ReadBlock { path, offset, len } => format!(
                "import binascii\n\
                 with open({p}, 'rb') as f:\n\
                 \x20   f.seek({offset})\n\
                 \x20   print(binascii.hexlify(f.read({len})).decode())\n",
                p = py_str(path)
            ),
            Request::WriteNew { path, data } => render_write(path, data, "wb"),
            Request::WriteAppend { path, data } => render_write(path, data, "ab"),
            Request::Mkdir { path } => {
                format!("import os\nos.mkdir({p})\n", p = py_str(path))
            }
            Request::Remove { path } => format!(
                "import os\n\
                 def rm(p):\n\
                 \x20   if os.stat(p)[0] & 0x4000:\n\
                 \x20       for n in os.listdir(p):\n\
                 \x20           rm((p if p != '/' else '') + '/' + n)\n\
                 \x20       os.rmdir(p)\n\
                 \x20   else:\n\
                 \x20       os.remove(p)\n\
                 rm({p})\n",
                p = py_str(path)
            ),
            Request::Rename { from, to } => format!(
                "import os\nos.rename({f}, {t})\n",
                f = py_str(from),
                t = py_str(to)
            ),
        };
        code.into_bytes()
    }
}

fn render_write(path: &str, data: &[u8], mode: &str) -> String {
    format!(
        "import binascii\n\
         with open({p}, '{mode}') as f:\n\
         \x20   f.write(binascii.unhexlify('{hex}'))\n",
        p = py_str(path),
        hex = hex::encode(data)
    )
}

/// Render `s` as a single-quoted Python string literal. Paths are data, not
/// code; anything the shell passes through must not break out of the quotes.
pub fn py_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

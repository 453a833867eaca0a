/*!
 * Virtual File System
 * In-memory filesystem service behind the filesystem capability
 *
 * The lifecycle core consumes exactly two operations: `root_directory()` and
 * `open(path, flags, mode, directory, credentials)`. Nodes live in a shared
 * table so writes through an open file are observable through the service
 * (dump files, terminal output).
 */

pub mod tty;

pub use tty::Terminal;

use crate::core::errors::{VfsError, VfsResult};
use crate::core::limits::DUMP_DIRECTORY;
use crate::process::credentials::Credentials;
use bitflags::bitflags;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

bitflags! {
    /// Open flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const READ     = 1 << 0;
        const WRITE    = 1 << 1;
        const CREATE   = 1 << 2;
        const TRUNCATE = 1 << 3;
    }
}

impl OpenFlags {
    #[inline]
    pub fn read_write() -> Self {
        OpenFlags::READ | OpenFlags::WRITE
    }
}

/// Reference to a directory, held by processes as working/root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirRef {
    path: String,
}

impl DirRef {
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// What a filesystem node is.
#[derive(Debug)]
enum NodeKind {
    File,
    Directory,
    /// Discards writes, yields nothing on read.
    NullDevice,
    /// Controlling-terminal endpoint.
    Tty(Arc<Terminal>),
}

/// One node in the shared table.
#[derive(Debug)]
pub struct VfsNode {
    path: String,
    kind: NodeKind,
    mode: u32,
    owner_uid: u32,
    owner_gid: u32,
    data: Mutex<Vec<u8>>,
}

impl VfsNode {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory)
    }

    pub fn size(&self) -> usize {
        self.data.lock().len()
    }

    /// Permission check against the effective identity. Effective uid 0
    /// bypasses mode bits.
    fn allows(&self, creds: &Credentials, want: u32) -> bool {
        if creds.euid == 0 {
            return true;
        }
        let shift = if creds.euid == self.owner_uid {
            6
        } else if creds.egid == self.owner_gid || creds.in_group(self.owner_gid) {
            3
        } else {
            0
        };
        (self.mode >> shift) & want == want
    }
}

/// Open-file handle; the descriptor table's owned I/O handle type.
#[derive(Debug)]
pub struct OpenFile {
    node: Arc<VfsNode>,
    flags: OpenFlags,
}

impl OpenFile {
    pub fn node(&self) -> &Arc<VfsNode> {
        &self.node
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn path(&self) -> &str {
        self.node.path()
    }

    /// Append `buf` to the node. Null devices discard; terminals collect
    /// output in the terminal buffer.
    pub fn write(&self, buf: &[u8]) -> VfsResult<usize> {
        if !self.flags.contains(OpenFlags::WRITE) {
            return Err(VfsError::WriteFailed(self.node.path.clone()));
        }
        match &self.node.kind {
            NodeKind::NullDevice => Ok(buf.len()),
            NodeKind::Tty(term) => {
                term.push_output(buf);
                Ok(buf.len())
            }
            NodeKind::Directory => Err(VfsError::WriteFailed(self.node.path.clone())),
            NodeKind::File => {
                self.node.data.lock().extend_from_slice(buf);
                Ok(buf.len())
            }
        }
    }
}

/// The filesystem service object.
#[derive(Debug)]
pub struct Vfs {
    nodes: DashMap<String, Arc<VfsNode>>,
}

impl Vfs {
    /// New filesystem seeded with `/`, `/dev/null` and the dump directory.
    pub fn new() -> Arc<Vfs> {
        let vfs = Vfs {
            nodes: DashMap::new(),
        };
        vfs.insert_node("/", NodeKind::Directory, 0o755, 0, 0);
        vfs.insert_node("/dev", NodeKind::Directory, 0o755, 0, 0);
        vfs.insert_node("/dev/null", NodeKind::NullDevice, 0o666, 0, 0);
        vfs.insert_node("/tmp", NodeKind::Directory, 0o777, 0, 0);
        vfs.insert_node(DUMP_DIRECTORY, NodeKind::Directory, 0o777, 0, 0);
        Arc::new(vfs)
    }

    /// The filesystem root.
    pub fn root_directory(&self) -> DirRef {
        DirRef { path: "/".into() }
    }

    /// Directory reference for an existing directory node.
    pub fn directory(&self, path: &str) -> VfsResult<DirRef> {
        let resolved = Self::resolve(path, None)?;
        let node = self
            .nodes
            .get(&resolved)
            .ok_or_else(|| VfsError::NotFound(resolved.clone()))?;
        if !node.is_directory() {
            return Err(VfsError::NotADirectory(resolved));
        }
        Ok(DirRef { path: resolved })
    }

    /// Open a node relative to `directory`. `mode` applies when `CREATE`
    /// makes a new file.
    pub fn open(
        &self,
        path: &str,
        flags: OpenFlags,
        mode: u32,
        directory: &DirRef,
        credentials: &Credentials,
    ) -> VfsResult<Arc<OpenFile>> {
        let resolved = Self::resolve(path, Some(directory))?;

        let node = match self.nodes.get(&resolved) {
            Some(node) => Arc::clone(node.value()),
            None if flags.contains(OpenFlags::CREATE) => {
                let parent = Self::parent_of(&resolved);
                let parent_node = self
                    .nodes
                    .get(&parent)
                    .ok_or_else(|| VfsError::NotFound(parent.clone()))?;
                if !parent_node.is_directory() {
                    return Err(VfsError::NotADirectory(parent));
                }
                if !parent_node.allows(credentials, 0o2) {
                    return Err(VfsError::AccessDenied(parent));
                }
                drop(parent_node);
                self.insert_node(
                    &resolved,
                    NodeKind::File,
                    mode,
                    credentials.euid,
                    credentials.egid,
                )
            }
            None => return Err(VfsError::NotFound(resolved)),
        };

        if flags.contains(OpenFlags::READ) && !node.allows(credentials, 0o4) {
            return Err(VfsError::AccessDenied(resolved));
        }
        if flags.contains(OpenFlags::WRITE) {
            if node.is_directory() {
                return Err(VfsError::AccessDenied(resolved));
            }
            if !node.allows(credentials, 0o2) {
                return Err(VfsError::AccessDenied(resolved));
            }
            if flags.contains(OpenFlags::TRUNCATE) {
                node.data.lock().clear();
            }
        }

        Ok(Arc::new(OpenFile { node, flags }))
    }

    /// Look up a node without opening it (used by the program loader).
    pub fn lookup(
        &self,
        path: &str,
        directory: &DirRef,
        credentials: &Credentials,
    ) -> VfsResult<Arc<VfsNode>> {
        let resolved = Self::resolve(path, Some(directory))?;
        let node = self
            .nodes
            .get(&resolved)
            .ok_or_else(|| VfsError::NotFound(resolved.clone()))?;
        if !node.allows(credentials, 0o4) {
            return Err(VfsError::AccessDenied(resolved));
        }
        Ok(Arc::clone(node.value()))
    }

    /// Whether `credentials` may execute the node.
    pub fn is_executable_by(&self, node: &VfsNode, credentials: &Credentials) -> bool {
        node.allows(credentials, 0o1)
    }

    /// Register a terminal device node.
    pub fn register_terminal(&self, terminal: &Arc<Terminal>) {
        let path = format!("/dev/{}", terminal.name());
        self.insert_node_with(path, NodeKind::Tty(Arc::clone(terminal)), 0o666, 0, 0);
    }

    /// Seed a regular file (fixtures, program images).
    pub fn add_file(&self, path: &str, data: &[u8], mode: u32) -> Arc<VfsNode> {
        let node = self.insert_node(path, NodeKind::File, mode, 0, 0);
        *node.data.lock() = data.to_vec();
        node
    }

    /// Read a file's contents back (diagnostics verification).
    pub fn read_file(&self, path: &str) -> VfsResult<Vec<u8>> {
        let resolved = Self::resolve(path, None)?;
        let node = self
            .nodes
            .get(&resolved)
            .ok_or_else(|| VfsError::NotFound(resolved))?;
        let data = node.data.lock().clone();
        Ok(data)
    }

    /// Paths currently under `prefix` (diagnostics verification).
    pub fn list_prefix(&self, prefix: &str) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && entry.key() != prefix)
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn insert_node(
        &self,
        path: &str,
        kind: NodeKind,
        mode: u32,
        owner_uid: u32,
        owner_gid: u32,
    ) -> Arc<VfsNode> {
        self.insert_node_with(path.to_string(), kind, mode, owner_uid, owner_gid)
    }

    fn insert_node_with(
        &self,
        path: String,
        kind: NodeKind,
        mode: u32,
        owner_uid: u32,
        owner_gid: u32,
    ) -> Arc<VfsNode> {
        let node = Arc::new(VfsNode {
            path: path.clone(),
            kind,
            mode,
            owner_uid,
            owner_gid,
            data: Mutex::new(Vec::new()),
        });
        self.nodes.insert(path, Arc::clone(&node));
        node
    }

    /// Normalize to an absolute path; relative paths resolve against `base`.
    fn resolve(path: &str, base: Option<&DirRef>) -> VfsResult<String> {
        if path.is_empty() {
            return Err(VfsError::InvalidPath(String::new()));
        }
        let joined = if path.starts_with('/') {
            path.to_string()
        } else {
            match base {
                Some(dir) if dir.path() == "/" => format!("/{path}"),
                Some(dir) => format!("{}/{path}", dir.path()),
                None => return Err(VfsError::InvalidPath(path.to_string())),
            }
        };

        let mut parts: Vec<&str> = Vec::new();
        for comp in joined.split('/') {
            match comp {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other),
            }
        }
        if parts.is_empty() {
            Ok("/".to_string())
        } else {
            Ok(format!("/{}", parts.join("/")))
        }
    }

    fn parent_of(path: &str) -> String {
        match path.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(idx) => path[..idx].to_string(),
        }
    }
}

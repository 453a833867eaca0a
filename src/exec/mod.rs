/*!
 * Exec Module
 * Program-loading capability consumed by user-process creation
 *
 * Stands in for a real ELF loader: validates the executable through the
 * filesystem, maps the text and stack regions, and computes the initial
 * context. Creation paths treat any error here as a wholesale abort.
 */

use crate::core::errors::{ExecError, ExecResult};
use crate::core::limits::{PAGE_SIZE, USER_IMAGE_BASE, USER_STACK_SIZE, USER_STACK_TOP};
use crate::memory::{AddressSpace, Protection};
use crate::process::credentials::Credentials;
use crate::vfs::{DirRef, Vfs, VfsNode};
use log::debug;
use std::sync::Arc;

/// A loaded program image.
pub struct Image {
    pub entry_point: u64,
    /// Initial stack pointer, below the copied argument block.
    pub stack_pointer: u64,
    pub executable: Arc<VfsNode>,
}

pub struct Loader {
    vfs: Arc<Vfs>,
}

impl Loader {
    pub fn new(vfs: Arc<Vfs>) -> Loader {
        Loader { vfs }
    }

    /// Load `path` into `space`: validate the image, map text and stack,
    /// place the argument block. Leaves `space` partially mapped on error;
    /// callers abort creation and drop the space wholesale.
    pub fn load(
        &self,
        path: &str,
        argv: &[String],
        envp: &[String],
        directory: &DirRef,
        credentials: &Credentials,
        space: &AddressSpace,
    ) -> ExecResult<Image> {
        let node = self.vfs.lookup(path, directory, credentials)?;

        if node.is_directory() {
            return Err(ExecError::NotExecutable(node.path().to_string()));
        }
        if !self.vfs.is_executable_by(&node, credentials) {
            return Err(ExecError::NotExecutable(node.path().to_string()));
        }
        let image_size = node.size() as u64;
        if image_size == 0 {
            return Err(ExecError::MalformedImage(format!(
                "{}: empty image",
                node.path()
            )));
        }

        space.add_region(
            "text",
            USER_IMAGE_BASE,
            round_up(image_size),
            Protection::READ | Protection::EXECUTE,
        );
        space.add_region(
            "stack",
            USER_STACK_TOP - USER_STACK_SIZE,
            USER_STACK_SIZE,
            Protection::READ | Protection::WRITE,
        );

        let stack_pointer = initial_stack_pointer(argv, envp);
        debug!(
            "loaded {} ({} bytes), entry {:#x}, sp {:#x}",
            node.path(),
            image_size,
            USER_IMAGE_BASE,
            stack_pointer
        );

        Ok(Image {
            entry_point: USER_IMAGE_BASE,
            stack_pointer,
            executable: node,
        })
    }
}

fn round_up(size: u64) -> u64 {
    (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Stack pointer after the argument block: string bytes with terminators,
/// plus a pointer slot per entry and two null sentinels, 16-byte aligned.
fn initial_stack_pointer(argv: &[String], envp: &[String]) -> u64 {
    let string_bytes: usize = argv
        .iter()
        .chain(envp.iter())
        .map(|s| s.len() + 1)
        .sum();
    let pointer_slots = (argv.len() + envp.len() + 2) * 8;
    (USER_STACK_TOP - (string_bytes + pointer_slots) as u64) & !0xf
}

// src/tasks/registry.rs

use std::collections::HashMap;
use std::fmt;

use super::{Task, TaskError};
use super::{archive, chnewline, crypto, email, exec, file_ops, icap, remote_delete};
use super::{transcode, transfer, updateconf};

pub type TaskConstructor = fn() -> Box<dyn Task>;

/// Maps task type names to constructors of fresh task instances.
///
/// Names are case-sensitive.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    constructors: HashMap<String, TaskConstructor>,
}

fn boxed<T: Task + Default + 'static>() -> Box<dyn Task> {
    Box::new(T::default())
}

impl TaskRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every task shipped with the crate.
    pub fn with_builtin_tasks() -> Self {
        let mut reg = Self::new();

        reg.register("COPY", boxed::<file_ops::CopyTask>);
        reg.register("COPYRENAME", boxed::<file_ops::CopyRenameTask>);
        reg.register("MOVE", boxed::<file_ops::MoveTask>);
        reg.register("MOVERENAME", boxed::<file_ops::MoveRenameTask>);
        reg.register("RENAME", boxed::<file_ops::RenameTask>);
        reg.register("DELETE", boxed::<file_ops::DeleteTask>);

        reg.register("EXEC", boxed::<exec::ExecTask>);
        reg.register("EXECMOVE", boxed::<exec::ExecMoveTask>);
        reg.register("EXECOUTPUT", boxed::<exec::ExecOutputTask>);

        reg.register("TRANSFER", boxed::<transfer::TransferTask>);
        reg.register("PREREGISTER", boxed::<transfer::PreregisterTask>);

        reg.register("ENCRYPT", boxed::<crypto::EncryptTask>);
        reg.register("DECRYPT", boxed::<crypto::DecryptTask>);
        reg.register("SIGN", boxed::<crypto::SignTask>);
        reg.register("VERIFY", boxed::<crypto::VerifyTask>);
        reg.register("ENCRYPT&SIGN", boxed::<crypto::EncryptSignTask>);
        reg.register("DECRYPT&VERIFY", boxed::<crypto::DecryptVerifyTask>);

        reg.register("ARCHIVE", boxed::<archive::ArchiveTask>);
        reg.register("EXTRACT", boxed::<archive::ExtractTask>);

        reg.register("TRANSCODE", boxed::<transcode::TranscodeTask>);
        reg.register("CHNEWLINE", boxed::<chnewline::ChNewlineTask>);

        reg.register("ICAP", boxed::<icap::IcapTask>);
        reg.register("EMAIL", boxed::<email::EmailTask>);
        reg.register("REMOTEDELETE", boxed::<remote_delete::RemoteDeleteTask>);
        reg.register("UPDATECONF", boxed::<updateconf::UpdateConfTask>);

        reg
    }

    /// Add or replace a task type.
    pub fn register(&mut self, name: impl Into<String>, ctor: TaskConstructor) {
        self.constructors.insert(name.into(), ctor);
    }

    /// Build a new instance of `name`.
    pub fn create(&self, name: &str) -> Result<Box<dyn Task>, TaskError> {
        self.constructors
            .get(name)
            .map(|ctor| ctor())
            .ok_or_else(|| TaskError::UnknownTaskType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_name_is_an_error_not_a_panic() {
        let reg = TaskRegistry::with_builtin_tasks();
        assert!(matches!(
            reg.create("NOPE"),
            Err(TaskError::UnknownTaskType(name)) if name == "NOPE"
        ));
    }

    #[test]
    fn names_are_case_sensitive() {
        let reg = TaskRegistry::with_builtin_tasks();
        assert!(reg.contains("COPY"));
        assert!(!reg.contains("copy"));
        assert!(reg.create("ENCRYPT&SIGN").is_ok());
    }
}

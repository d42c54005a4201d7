use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::basic::{BasicAdapter, BasicCommand, Errmsg, ErrmsgCommand};
use super::definition::{Command, CommandDefinition};
use super::typed::{TypedAdapter, TypedCommand, TypedRequest};

// ---------------------------------------------------------------------------
// RegistryError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("command name '{name}' is already registered")]
    Duplicate { name: String },
}

// ---------------------------------------------------------------------------
// CommandRegistry
// ---------------------------------------------------------------------------

/// Name to descriptor table.
///
/// Built during single-threaded startup through `&mut self` and read-only
/// afterwards, so lookups need no synchronization. Names and aliases share
/// one namespace; lookup is exact and case-sensitive. Entries are never
/// removed, which keeps every `Arc<CommandDefinition>` handed to an
/// invocation valid for the process lifetime.
pub struct CommandRegistry {
    /// Every name and alias, each pointing at its descriptor.
    by_name: BTreeMap<String, Arc<CommandDefinition>>,
    unknown: AtomicU64,
}

impl CommandRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_name: BTreeMap::new(),
            unknown: AtomicU64::new(0),
        }
    }

    /// Registers `definition` under its name and aliases, or reports the
    /// first name already taken. Nothing is inserted on failure.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] on any name or alias collision,
    /// including an alias repeating the command's own name.
    pub fn try_register_command(
        &mut self,
        definition: CommandDefinition,
    ) -> Result<Arc<CommandDefinition>, RegistryError> {
        let mut keys: Vec<&str> = Vec::with_capacity(definition.aliases().len() + 1);
        keys.push(definition.name());
        keys.extend(definition.aliases().iter().map(String::as_str));
        for (i, key) in keys.iter().enumerate() {
            if self.by_name.contains_key(*key) || keys[..i].contains(key) {
                return Err(RegistryError::Duplicate {
                    name: (*key).to_string(),
                });
            }
        }
        let owned: Vec<String> = keys.into_iter().map(str::to_string).collect();
        let definition = Arc::new(definition);
        for key in owned {
            self.by_name.insert(key, definition.clone());
        }
        Ok(definition)
    }

    /// Registers `definition`. A collision is a build defect, not a runtime
    /// condition.
    ///
    /// # Panics
    ///
    /// Panics if the name or any alias is already registered.
    pub fn register_command(&mut self, definition: CommandDefinition) -> Arc<CommandDefinition> {
        match self.try_register_command(definition) {
            Ok(definition) => definition,
            Err(e) => panic!("{e}"),
        }
    }

    /// Registers a direct [`Command`] implementation.
    ///
    /// # Panics
    ///
    /// See [`CommandRegistry::register_command`].
    pub fn register<C: Command>(
        &mut self,
        name: &str,
        aliases: &[&str],
        command: C,
    ) -> Arc<CommandDefinition> {
        self.register_command(CommandDefinition::new(name, aliases, Box::new(command)))
    }

    /// Registers a typed command under its request's `COMMAND_NAME`.
    ///
    /// # Panics
    ///
    /// See [`CommandRegistry::register_command`].
    pub fn register_typed<C: TypedCommand>(
        &mut self,
        command: C,
        aliases: &[&str],
    ) -> Arc<CommandDefinition> {
        self.register(
            <C::Request as TypedRequest>::COMMAND_NAME,
            aliases,
            TypedAdapter::new(command),
        )
    }

    /// Registers a body-only command.
    ///
    /// # Panics
    ///
    /// See [`CommandRegistry::register_command`].
    pub fn register_basic<C: BasicCommand>(
        &mut self,
        command: C,
        aliases: &[&str],
    ) -> Arc<CommandDefinition> {
        self.register(C::NAME, aliases, BasicAdapter::new(command))
    }

    /// Registers an errmsg-style command.
    ///
    /// # Panics
    ///
    /// See [`CommandRegistry::register_command`].
    pub fn register_errmsg<C: ErrmsgCommand>(
        &mut self,
        command: C,
        aliases: &[&str],
    ) -> Arc<CommandDefinition> {
        self.register_basic(Errmsg(command), aliases)
    }

    /// Looks up a command by exact name or alias.
    #[must_use]
    pub fn find_command(&self, name: &str) -> Option<Arc<CommandDefinition>> {
        self.by_name.get(name).cloned()
    }

    /// Every registered name and alias with its descriptor, sorted by name.
    pub fn all_commands(&self) -> impl Iterator<Item = (&str, &Arc<CommandDefinition>)> {
        self.by_name.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Each descriptor once, sorted by primary name.
    pub fn commands(&self) -> impl Iterator<Item = &Arc<CommandDefinition>> {
        self.by_name
            .iter()
            .filter(|(k, v)| k.as_str() == v.name())
            .map(|(_, v)| v)
    }

    /// Counts a request naming no registered command.
    pub fn increment_unknown_commands(&self) {
        self.unknown.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn unknown_commands(&self) -> u64 {
        self.unknown.load(Ordering::Relaxed)
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

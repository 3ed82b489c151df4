use crate::value::SqlValue;

/// How the command text should be interpreted by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Parameterized SQL text
    Text,
    /// Stored procedure invoked by name
    StoredProcedure,
}

/// Direction of a command parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamDirection {
    Input,
    Output,
    InputOutput,
    ReturnValue,
}

/// A single command parameter.
///
/// Names are stored without the backend's placeholder prefix; drivers apply
/// their own prefix when binding.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub direction: ParamDirection,
    pub value: SqlValue,
}

impl Parameter {
    #[must_use]
    pub fn input(name: impl Into<String>, value: SqlValue) -> Self {
        Self {
            name: name.into(),
            direction: ParamDirection::Input,
            value,
        }
    }

    #[must_use]
    pub fn output(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: ParamDirection::Output,
            value: SqlValue::Null,
        }
    }

    #[must_use]
    pub fn input_output(name: impl Into<String>, value: SqlValue) -> Self {
        Self {
            name: name.into(),
            direction: ParamDirection::InputOutput,
            value,
        }
    }

    /// Whether the driver is expected to write a value back after execution.
    #[must_use]
    pub fn is_output(&self) -> bool {
        matches!(
            self.direction,
            ParamDirection::Output | ParamDirection::InputOutput | ParamDirection::ReturnValue
        )
    }
}

/// A command and its parameters bundled together.
///
/// Built by a caller-supplied factory, attached to the session's live
/// connection by the execution envelope, and dropped when the call ends.
/// After a successful execution, output parameter values written by the
/// driver are readable through [`Command::output`].
#[derive(Debug, Clone)]
pub struct Command {
    kind: CommandKind,
    text: String,
    params: Vec<Parameter>,
}

impl Command {
    /// Parameterized SQL text command.
    #[must_use]
    pub fn text(sql: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::Text,
            text: sql.into(),
            params: Vec::new(),
        }
    }

    /// Stored-procedure command.
    #[must_use]
    pub fn stored_procedure(name: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::StoredProcedure,
            text: name.into(),
            params: Vec::new(),
        }
    }

    /// Append an input parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: SqlValue) -> Self {
        self.params.push(Parameter::input(name, value));
        self
    }

    /// Append an output parameter.
    #[must_use]
    pub fn out_param(mut self, name: impl Into<String>) -> Self {
        self.params.push(Parameter::output(name));
        self
    }

    /// Append a fully specified parameter.
    #[must_use]
    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.params.push(parameter);
        self
    }

    #[must_use]
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// The SQL text or procedure name.
    #[must_use]
    pub fn command_text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    /// Value of a named parameter after execution (output parameters are
    /// populated by the driver once the call has fully completed).
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&SqlValue> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }

    /// Write a driver-produced value into the matching parameter slot.
    pub fn set_output(&mut self, name: &str, value: SqlValue) {
        if let Some(param) = self.params.iter_mut().find(|p| p.name == name) {
            param.value = value;
        }
    }
}

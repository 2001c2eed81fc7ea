use siteguard_core::errors::SandboxError;
use siteguard_core::sandbox::{self, Bindings};

use super::CommandResult;

const COMMAND: &str = "eval";

/// Evaluates a restricted comparison expression against `name=value` bindings.
pub fn run(expression: &str, bindings: &[String]) -> CommandResult {
    let bindings = match parse_bindings(bindings) {
        Ok(bindings) => bindings,
        Err(message) => return CommandResult::failure(COMMAND, "invalid_binding", message, 2),
    };

    match sandbox::evaluate_expression(expression, &bindings) {
        Ok(value) => CommandResult::success(COMMAND, format_value(value)),
        Err(error @ SandboxError::Violation { .. }) => {
            CommandResult::failure(COMMAND, "sandbox_violation", error.to_string(), 2)
        }
        Err(error) => CommandResult::failure(COMMAND, "evaluation", error.to_string(), 1),
    }
}

fn parse_bindings(raw: &[String]) -> Result<Bindings, String> {
    let mut bindings = Bindings::new();
    for binding in raw {
        let (name, value) =
            binding.split_once('=').ok_or_else(|| format!("binding `{binding}` is not of the form name=value"))?;
        let value: f64 =
            value.trim().parse().map_err(|_| format!("binding `{binding}` does not have a numeric value"))?;
        bindings.insert(name.trim().to_string(), value);
    }
    Ok(bindings)
}

fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{format_value, parse_bindings};

    #[test]
    fn bindings_parse_name_value_pairs() {
        let bindings = parse_bindings(&["wind = 25".to_string(), "limit=20.5".to_string()]).expect("bindings");
        assert_eq!(bindings.get("wind"), Some(&25.0));
        assert_eq!(bindings.get("limit"), Some(&20.5));
        assert!(parse_bindings(&["wind".to_string()]).is_err());
        assert!(parse_bindings(&["wind=fast".to_string()]).is_err());
    }

    #[test]
    fn whole_numbers_render_without_a_fraction() {
        assert_eq!(format_value(1.0), "1");
        assert_eq!(format_value(2.5), "2.5");
    }
}

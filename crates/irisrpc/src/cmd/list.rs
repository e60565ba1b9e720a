use irisrpc_u64json::{Object, Value};

use crate::cmd::{connect, ListArgs};
use crate::exit::{rpc_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_value, OutputFormat};

pub fn run(args: ListArgs, format: OutputFormat) -> CliResult<i32> {
    let client = connect(&args.target)?;
    let result = client.call("instanceRegistry_getList", Object::new());
    client.disconnect(false);

    let list = result.map_err(|err| rpc_error("instanceRegistry_getList failed", err))?;
    let instances = list.to_array().ok_or_else(|| {
        CliError::new(
            DATA_INVALID,
            format!("instanceRegistry_getList returned {}", list.type_name()),
        )
    })?;

    let selected: Vec<Value> = instances
        .into_iter()
        .filter(|inst| match (&args.pattern, inst.get("instName").and_then(Value::as_str)) {
            (None, _) => true,
            (Some(pattern), Some(name)) => glob_match(pattern, name),
            (Some(_), None) => false,
        })
        .collect();

    print_value(&Value::Array(selected), format);
    Ok(SUCCESS)
}

/// Shell-style match: `*` any run of characters, `?` exactly one.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();

    let (mut p, mut n) = (0, 0);
    // Position after the last `*` and the name position it was tried at.
    let mut backtrack: Option<(usize, usize)> = None;

    while n < name.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p + 1, n));
                p += 1;
            }
            Some(&c) if c == '?' || c == name[n] => {
                p += 1;
                n += 1;
            }
            _ => match backtrack {
                Some((star_p, star_n)) => {
                    p = star_p;
                    n = star_n + 1;
                    backtrack = Some((star_p, star_n + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_literal_and_wildcards() {
        assert!(glob_match("component.cpu0", "component.cpu0"));
        assert!(!glob_match("component.cpu0", "component.cpu1"));
        assert!(glob_match("component.*", "component.cpu0"));
        assert!(glob_match("*.cpu?", "component.cpu7"));
        assert!(!glob_match("*.cpu?", "component.cpu10"));
        assert!(glob_match("*cpu*", "framework.cpu.debug"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("?", ""));
    }

    #[test]
    fn glob_backtracks_over_repeated_segments() {
        assert!(glob_match("a*b*c", "aXbYbZc"));
        assert!(!glob_match("a*b*c", "aXbYbZ"));
        assert!(glob_match("client.*_?", "client.irisrpc_0"));
    }
}

//! Circular dependency detection over declared dependency names.

use std::collections::HashSet;

const MAX_DEPTH: usize = 1024;

/// Finds a cycle reachable from `start`, following `dependencies_of`.
///
/// Returns the cycle as a closed path, e.g. `["a", "b", "a"]`. Names for
/// which `dependencies_of` returns `None` are treated as leaves; reporting
/// them is the resolver's job.
pub(crate) fn find_cycle<'a, F>(start: &'a str, dependencies_of: F) -> Option<Vec<String>>
where
    F: Fn(&str) -> Option<&'a [String]>,
{
    let mut stack = Vec::new();
    let mut done = HashSet::new();
    walk(start, &dependencies_of, &mut stack, &mut done)
}

/// Every distinct cycle among `names`, each reported once.
pub(crate) fn find_all_cycles<'a, F>(names: impl IntoIterator<Item = &'a str>, dependencies_of: F) -> Vec<Vec<String>>
where
    F: Fn(&str) -> Option<&'a [String]>,
{
    let mut cycles: Vec<Vec<String>> = Vec::new();
    let mut done = HashSet::new();
    for name in names {
        let mut stack = Vec::new();
        if let Some(cycle) = walk(name, &dependencies_of, &mut stack, &mut done) {
            if !cycles.iter().any(|known| same_cycle(known, &cycle)) {
                cycles.push(cycle);
            }
        }
    }
    cycles
}

fn walk<'a, F>(
    name: &'a str,
    dependencies_of: &F,
    stack: &mut Vec<&'a str>,
    done: &mut HashSet<&'a str>,
) -> Option<Vec<String>>
where
    F: Fn(&str) -> Option<&'a [String]>,
{
    if let Some(pos) = stack.iter().position(|&n| n == name) {
        let mut cycle: Vec<String> = stack[pos..].iter().map(|n| n.to_string()).collect();
        cycle.push(name.to_string());
        return Some(cycle);
    }
    if done.contains(name) || stack.len() >= MAX_DEPTH {
        return None;
    }

    stack.push(name);
    if let Some(dependencies) = dependencies_of(name) {
        for dependency in dependencies {
            if let Some(cycle) = walk(dependency.as_str(), dependencies_of, stack, done) {
                return Some(cycle);
            }
        }
    }
    stack.pop();
    done.insert(name);
    None
}

/// Same cycle regardless of the node it was entered from.
fn same_cycle(a: &[String], b: &[String]) -> bool {
    let a: HashSet<&String> = a.iter().collect();
    let b: HashSet<&String> = b.iter().collect();
    a == b
}

/// The closed cycle formed by re-entering `name` on `path`, if it does.
pub(crate) fn reentry(path: &[String], name: &str) -> Option<Vec<String>> {
    let pos = path.iter().position(|n| n == name)?;
    let mut cycle = path[pos..].to_vec();
    cycle.push(name.to_string());
    Some(cycle)
}

//! Options of the JVMCI compiler itself, passed on the VM command line.
//!
//! The compiler publishes its options as descriptor lines of the form
//! `name<TAB>type<TAB>help<TAB>declaringClass<TAB>fieldClass`. Arguments are then parsed against
//! the descriptors: `+Name`/`-Name` for booleans and `Name=value` for everything else. Unknown
//! names get a "did you mean" suggestion when a descriptor name is similar enough.

use std::io::Write;

use strum_macros::{Display, EnumString, IntoStaticStr};

use crate::util::hashtable::{compute_string_hash, HandleTable, KeyOps};

/// Name of the built-in pseudo option that lists all the options.
pub const PRINT_FLAGS_ARG: &str = "PrintFlags";
const PRINT_FLAGS_HELP: &str = "Prints all JVMCI flags (similar to XX's PrintFlagsFinal)";

/// The minimum similarity for a descriptor name to be suggested for an unknown option.
pub const FUZZY_MATCH_SIMILARITY: f32 = 0.7;

const MAX_OPTION_NAME_LEN: usize = 256;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
pub enum OptionType {
    #[strum(serialize = "s", to_string = "String")]
    String,
    #[strum(serialize = "i", to_string = "int")]
    Int,
    #[strum(serialize = "j", to_string = "long")]
    Long,
    #[strum(serialize = "f", to_string = "float")]
    Float,
    #[strum(serialize = "d", to_string = "double")]
    Double,
    #[strum(serialize = "z", to_string = "boolean")]
    Boolean,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OptionDesc {
    pub name: String,
    pub help: String,
    pub option_type: OptionType,
    /// `None` for pseudo options that do not correspond to a field.
    pub declaring_class: Option<String>,
    pub field_class: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum OptionValueKind {
    String(String),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Boolean(bool),
}

#[derive(Clone, Debug, PartialEq)]
pub struct OptionValue {
    pub desc: OptionDesc,
    pub value: OptionValueKind,
}

pub struct OptionNameKey;

impl KeyOps<OptionDesc> for OptionNameKey {
    type Key = str;
    fn key(value: &OptionDesc) -> &str {
        &value.name
    }
    fn hash(key: &str) -> u32 {
        compute_string_hash(key)
    }
    fn equals(k1: &str, k2: &str) -> bool {
        k1 == k2
    }
}

impl KeyOps<OptionValue> for OptionNameKey {
    type Key = str;
    fn key(value: &OptionValue) -> &str {
        &value.desc.name
    }
    fn hash(key: &str) -> u32 {
        compute_string_hash(key)
    }
    fn equals(k1: &str, k2: &str) -> bool {
        k1 == k2
    }
}

/// All the known option descriptors, keyed by name.
pub struct OptionDescsTable {
    table: HandleTable<OptionDesc, OptionNameKey>,
}

impl Default for OptionDescsTable {
    fn default() -> Self {
        Self::new()
    }
}

impl OptionDescsTable {
    /// An empty table apart from the `PrintFlags` pseudo option.
    pub fn new() -> Self {
        let mut table = HandleTable::new(100);
        table.add(OptionDesc {
            name: PRINT_FLAGS_ARG.to_string(),
            help: PRINT_FLAGS_HELP.to_string(),
            option_type: OptionType::Boolean,
            declaring_class: None,
            field_class: None,
        });
        Self { table }
    }

    /// Parse one descriptor line and add it to the table.
    pub fn parse_line(&mut self, line: &str) -> Result<(), String> {
        let mut parts = line.splitn(5, '\t');
        let name = parts
            .next()
            .filter(|_| line.contains('\t'))
            .ok_or("invalid format: could not find first tab")?;
        let type_str = parts.next().ok_or("invalid format: could not find second tab")?;
        if type_str.chars().count() != 1 {
            return Err("invalid format: type should be 1 char long".to_string());
        }
        let help = parts.next().ok_or("invalid format: could not find third tab")?;
        let declaring_class = parts.next().ok_or("invalid format: could not find fourth tab")?;
        // The last column runs to the end of the line.
        let field_class = parts.next().ok_or("invalid format: could not find fourth tab")?;
        let option_type: OptionType = type_str.parse().map_err(|_| "unknown type".to_string())?;
        let desc = OptionDesc {
            name: name.to_string(),
            help: help.to_string(),
            option_type,
            declaring_class: Some(declaring_class.to_string()),
            field_class: Some(field_class.trim_end_matches(['\r', '\n']).to_string()),
        };
        if !self.table.add(desc) {
            return Err("duplicate option".to_string());
        }
        Ok(())
    }

    /// Build a table from descriptor lines. Blank lines are skipped. The first bad line aborts loading.
    pub fn load<'a, I: IntoIterator<Item = &'a str>>(lines: I) -> Result<Self, String> {
        let mut table = Self::new();
        for line in lines.into_iter().filter(|l| !l.trim().is_empty()) {
            if let Err(e) = table.parse_line(line) {
                warn!("{}", e);
                return Err(e);
            }
        }
        Ok(table)
    }

    pub fn get(&self, name: &str) -> Option<&OptionDesc> {
        if name.len() >= MAX_OPTION_NAME_LEN {
            return None;
        }
        self.table.get(name)
    }

    pub fn number_of_entries(&self) -> usize {
        self.table.number_of_entries()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OptionDesc> {
        self.table.iter()
    }

    /// The descriptor whose name is most similar to `name`, if any clears the similarity threshold.
    /// Ties keep the first candidate in table order.
    pub fn fuzzy_match(&self, name: &str) -> Option<&OptionDesc> {
        let mut best: Option<(&OptionDesc, f32)> = None;
        for desc in self.table.iter() {
            let score = str_similar(&desc.name, name);
            if score >= FUZZY_MATCH_SIMILARITY && best.map_or(true, |(_, s)| score > s) {
                best = Some((desc, score));
            }
        }
        best.map(|(desc, _)| desc)
    }

    /// The message for an unknown option, with a suggestion when one is close enough.
    pub fn not_found_message(&self, name: &str) -> String {
        let mut msg = format!("Unrecognized VM option '{}'", name);
        if let Some(matched) = self.fuzzy_match(name) {
            let is_boolean = matched.option_type == OptionType::Boolean;
            msg.push_str(&format!(
                "\nDid you mean '{}{}{}'?",
                if is_boolean { "(+/-)" } else { "" },
                matched.name,
                if is_boolean { "" } else { "=<value>" }
            ));
        }
        msg
    }

    /// Print every descriptor, sorted by name, like `-XX:+PrintFlagsFinal`.
    pub fn print_flags<W: Write>(&self, values: &OptionValuesTable, out: &mut W) -> std::io::Result<()> {
        use itertools::Itertools;
        writeln!(out, "[List of JVMCI options]")?;
        for desc in self.iter().sorted_by(|a, b| a.name.cmp(&b.name)) {
            let value = values
                .get(&desc.name)
                .map(|v| format_value(&v.value))
                .unwrap_or_default();
            let assign = if values.get(&desc.name).is_some() { ":=" } else { " =" };
            writeln!(
                out,
                "{:>9} {:<40} {} {:<14} {}",
                desc.option_type.to_string(),
                desc.name,
                assign,
                value,
                desc.help
            )?;
        }
        Ok(())
    }
}

fn format_value(value: &OptionValueKind) -> String {
    match value {
        OptionValueKind::String(s) => format!("\"{}\"", s),
        OptionValueKind::Int(v) => v.to_string(),
        OptionValueKind::Long(v) => v.to_string(),
        OptionValueKind::Float(v) => v.to_string(),
        OptionValueKind::Double(v) => v.to_string(),
        OptionValueKind::Boolean(v) => v.to_string(),
    }
}

/// Dice's coefficient over character bigrams of the lower-cased names: twice the number of
/// bigrams of `a` found in `b`, divided by the number of bigrams in both.
pub fn str_similar(a: &str, b: &str) -> f32 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    if a.len() < 2 || b.len() < 2 {
        return 0.0;
    }
    let hits = a
        .windows(2)
        .filter(|x| b.windows(2).any(|y| *x == y))
        .count();
    let total = (a.len() - 1) + (b.len() - 1);
    2.0 * hits as f32 / total as f32
}

/// Option values set on the command line, keyed by name.
pub struct OptionValuesTable {
    table: HandleTable<OptionValue, OptionNameKey>,
}

impl Default for OptionValuesTable {
    fn default() -> Self {
        Self::new()
    }
}

impl OptionValuesTable {
    pub fn new() -> Self {
        Self {
            table: HandleTable::new(100),
        }
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.table.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OptionValue> {
        self.table.iter()
    }

    pub fn number_of_entries(&self) -> usize {
        self.table.number_of_entries()
    }

    /// Was `PrintFlags` requested?
    pub fn print_flags_requested(&self) -> bool {
        matches!(
            self.get(PRINT_FLAGS_ARG).map(|v| &v.value),
            Some(OptionValueKind::Boolean(true))
        )
    }

    /// Parse one argument against the descriptors and record its value. A later setting of the same
    /// option replaces an earlier one. The error is the message to report to the user.
    pub fn parse_argument(&mut self, descs: &OptionDescsTable, arg: &str) -> Result<(), String> {
        if let Some(name) = arg.strip_prefix(['+', '-']) {
            let desc = descs.get(name).ok_or_else(|| descs.not_found_message(name))?;
            if desc.option_type != OptionType::Boolean {
                return Err(format!("Unexpected +/- setting in VM option '{}'", name));
            }
            self.table.put(OptionValue {
                desc: desc.clone(),
                value: OptionValueKind::Boolean(arg.starts_with('+')),
            });
            return Ok(());
        }

        let (name, value) = match arg.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (arg, None),
        };
        let desc = descs.get(name).ok_or_else(|| descs.not_found_message(name))?;
        if desc.option_type == OptionType::Boolean {
            return Err(format!("Missing +/- setting for VM option '{}'", name));
        }
        let value = value.ok_or_else(|| {
            format!("Must use '-G:{}=<value>' format for {} option", name, name)
        })?;
        let parsed = match desc.option_type {
            OptionType::Int => value
                .parse()
                .map(OptionValueKind::Int)
                .map_err(|_| format!("Expected int value for VM option '{}'", name))?,
            OptionType::Long => value
                .parse()
                .map(OptionValueKind::Long)
                .map_err(|_| format!("Expected long value for VM option '{}'", name))?,
            OptionType::Float => value
                .parse()
                .map(OptionValueKind::Float)
                .map_err(|_| format!("Expected float value for VM option '{}'", name))?,
            OptionType::Double => value
                .parse()
                .map(OptionValueKind::Double)
                .map_err(|_| format!("Expected double value for VM option '{}'", name))?,
            OptionType::String => OptionValueKind::String(value.to_string()),
            OptionType::Boolean => unreachable!(),
        };
        self.table.put(OptionValue {
            desc: desc.clone(),
            value: parsed,
        });
        Ok(())
    }

    /// Parse all the arguments, reporting the first failure on the error stream.
    pub fn parse_arguments<'a, I: IntoIterator<Item = &'a str>>(
        descs: &OptionDescsTable,
        args: I,
    ) -> Option<Self> {
        let mut values = Self::new();
        for arg in args {
            if let Err(msg) = values.parse_argument(descs, arg) {
                eprintln!("{}", msg);
                return None;
            }
        }
        Some(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descs() -> OptionDescsTable {
        OptionDescsTable::load([
            "Inline\tz\tEnable inlining\torg.graalvm.compiler.core.GraalOptions\torg.graalvm.options.OptionValue",
            "MaximumInliningSize\ti\tInlining size limit\torg.graalvm.compiler.core.GraalOptions\torg.graalvm.options.OptionValue",
            "Dump\ts\tDump filter\torg.graalvm.compiler.debug.DebugOptions\torg.graalvm.options.OptionValue",
        ])
        .unwrap()
    }

    #[test]
    fn load_descriptors() {
        let table = descs();
        // The three descriptors plus PrintFlags
        assert_eq!(table.number_of_entries(), 4);
        let desc = table.get("MaximumInliningSize").unwrap();
        assert_eq!(desc.option_type, OptionType::Int);
        assert_eq!(desc.declaring_class.as_deref(), Some("org.graalvm.compiler.core.GraalOptions"));
    }

    #[test]
    fn bad_descriptor_lines() {
        assert_eq!(
            OptionDescsTable::load(["NoTabs"]).err().unwrap(),
            "invalid format: could not find first tab"
        );
        assert_eq!(
            OptionDescsTable::load(["A\tzz\thelp\tC\tF"]).err().unwrap(),
            "invalid format: type should be 1 char long"
        );
        assert_eq!(
            OptionDescsTable::load(["A\tq\thelp\tC\tF"]).err().unwrap(),
            "unknown type"
        );
        assert_eq!(
            OptionDescsTable::load(["A\tz\th\tC\tF", "A\ti\th\tC\tF"]).err().unwrap(),
            "duplicate option"
        );
    }

    #[test]
    fn parse_boolean() {
        let descs = descs();
        let mut values = OptionValuesTable::new();
        values.parse_argument(&descs, "-Inline").unwrap();
        assert_eq!(values.get("Inline").unwrap().value, OptionValueKind::Boolean(false));
        values.parse_argument(&descs, "+Inline").unwrap();
        assert_eq!(values.get("Inline").unwrap().value, OptionValueKind::Boolean(true));
        assert_eq!(values.number_of_entries(), 1);
        assert_eq!(
            values.parse_argument(&descs, "Inline=true").unwrap_err(),
            "Missing +/- setting for VM option 'Inline'"
        );
    }

    #[test]
    fn parse_typed_values() {
        let descs = descs();
        let mut values = OptionValuesTable::new();
        values.parse_argument(&descs, "MaximumInliningSize=300").unwrap();
        assert_eq!(
            values.get("MaximumInliningSize").unwrap().value,
            OptionValueKind::Int(300)
        );
        assert_eq!(
            values.parse_argument(&descs, "MaximumInliningSize=big").unwrap_err(),
            "Expected int value for VM option 'MaximumInliningSize'"
        );
        assert_eq!(
            values.parse_argument(&descs, "+MaximumInliningSize").unwrap_err(),
            "Unexpected +/- setting in VM option 'MaximumInliningSize'"
        );
        values.parse_argument(&descs, "Dump=a=b").unwrap();
        assert_eq!(
            values.get("Dump").unwrap().value,
            OptionValueKind::String("a=b".to_string())
        );
    }

    #[test]
    fn unknown_option_suggestion() {
        let descs = descs();
        let mut values = OptionValuesTable::new();
        let msg = values.parse_argument(&descs, "+Inlin").unwrap_err();
        assert_eq!(msg, "Unrecognized VM option 'Inlin'\nDid you mean '(+/-)Inline'?");
        let msg = values.parse_argument(&descs, "MaximumInlineSize=3").unwrap_err();
        assert!(msg.ends_with("Did you mean 'MaximumInliningSize=<value>'?"));
        let msg = values.parse_argument(&descs, "NoSuchFlag123=3").unwrap_err();
        assert_eq!(msg, "Unrecognized VM option 'NoSuchFlag123'");
    }

    #[test]
    fn similarity() {
        assert_eq!(str_similar("abc", "abc"), 1.0);
        assert_eq!(str_similar("a", "abc"), 0.0);
        assert!(str_similar("Inline", "inlin") >= FUZZY_MATCH_SIMILARITY);
        assert!(str_similar("NoSuchFlag123", "Inline") < FUZZY_MATCH_SIMILARITY);
    }

    #[test]
    fn print_flags() {
        let descs = descs();
        let values = OptionValuesTable::parse_arguments(&descs, ["+PrintFlags", "Dump=x"]).unwrap();
        assert!(values.print_flags_requested());
        let mut out = Vec::new();
        descs.print_flags(&values, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "[List of JVMCI options]");
        // Sorted by name
        assert!(lines[1].contains("Dump"));
        assert!(lines[1].contains(":= \"x\""));
        assert!(lines[4].contains("PrintFlags"));
    }
}

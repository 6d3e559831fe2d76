//! GPU breakpoint requests: what the user asked for, before resolution

use tracing::debug;
use wavepoint_common::protocol::{ConditionCode, PacketCondition};
use wavepoint_common::{parse_dim_argument, Error, Result, WaveDim3};

/// Wildcard carried by breakpoints that fire on every dispatch
pub const ANY_KERNEL_PATTERN: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Unknown,
    KernelFunction,
    SourceLocation,
    AnyLocation,
}

/// Type-tagged payload of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestLocation {
    Unknown,
    KernelFunction {
        name: String,
    },
    SourceLocation {
        file: Option<String>,
        line: u64,
        /// Statement text, filled in once the line is resolved
        source_line: Option<String>,
    },
    AnyLocation {
        pattern: String,
    },
}

impl RequestLocation {
    pub fn kind(&self) -> RequestKind {
        match self {
            RequestLocation::Unknown => RequestKind::Unknown,
            RequestLocation::KernelFunction { .. } => RequestKind::KernelFunction,
            RequestLocation::SourceLocation { .. } => RequestKind::SourceLocation,
            RequestLocation::AnyLocation { .. } => RequestKind::AnyLocation,
        }
    }

    /// Kernel name sent to the agent for kernel-entry breakpoints
    pub fn kernel_name(&self) -> Option<&str> {
        match self {
            RequestLocation::KernelFunction { name } => Some(name),
            RequestLocation::AnyLocation { pattern } => Some(pattern),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointCondition {
    pub text: Option<String>,
    pub code: ConditionCode,
    pub work_group: WaveDim3,
    pub work_item: WaveDim3,
}

impl Default for BreakpointCondition {
    fn default() -> Self {
        Self::any()
    }
}

impl BreakpointCondition {
    /// Unconditional
    pub fn any() -> Self {
        Self {
            text: None,
            code: ConditionCode::Any,
            work_group: WaveDim3::UNKNOWN,
            work_item: WaveDim3::UNKNOWN,
        }
    }

    pub fn equal(work_group: WaveDim3, work_item: WaveDim3) -> Self {
        Self {
            text: Some(format!("if wg:{} wi:{}", work_group, work_item)),
            code: ConditionCode::Equal,
            work_group,
            work_item,
        }
    }

    /// Parse `if wg:x,y,z wi:x,y,z`; the two groups may come in either order.
    /// No text at all means unconditional.
    pub fn parse(text: Option<&str>) -> Result<Self> {
        let Some(raw) = text.filter(|t| !t.trim().is_empty()) else {
            return Ok(Self::any());
        };

        let body = raw
            .trim_start()
            .strip_prefix("if ")
            .ok_or_else(|| Error::ConditionSyntax(format!("expected 'if', got \"{}\"", raw)))?;

        let work_group = parse_dim_argument(body, "wg");
        let work_item = parse_dim_argument(body, "wi");
        match (work_group, work_item) {
            (Some(work_group), Some(work_item)) => Ok(Self {
                text: Some(raw.to_string()),
                code: ConditionCode::Equal,
                work_group,
                work_item,
            }),
            _ => Err(Error::ConditionSyntax(format!(
                "expected \"wg:x,y,z wi:x,y,z\", got \"{}\"",
                body.trim()
            ))),
        }
    }

    /// Does a wave in `work_group` satisfy this condition
    pub fn matches_work_group(&self, work_group: WaveDim3) -> bool {
        match self.code {
            ConditionCode::Any => true,
            ConditionCode::Equal => self.work_group == work_group,
            ConditionCode::Unknown => false,
        }
    }

    pub fn to_packet(&self) -> PacketCondition {
        match self.code {
            ConditionCode::Equal => PacketCondition {
                code: ConditionCode::Equal,
                work_group: self.work_group,
                work_item: self.work_item,
            },
            code => PacketCondition {
                code,
                ..PacketCondition::default()
            },
        }
    }

    fn clear(&mut self) {
        self.text = None;
        self.code = ConditionCode::Unknown;
        self.work_group = WaveDim3::UNKNOWN;
        self.work_item = WaveDim3::UNKNOWN;
    }
}

/// A user's GPU breakpoint intent, owned by one host breakpoint.
///
/// Cloning is a deep copy; the pending cache and the host never share text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointRequest {
    /// Host breakpoint number, -1 once cleared
    pub number: i32,
    pub condition: BreakpointCondition,
    pub location: RequestLocation,
}

impl BreakpointRequest {
    pub fn new(number: i32, location: RequestLocation, condition: BreakpointCondition) -> Self {
        Self {
            number,
            condition,
            location,
        }
    }

    pub fn kind(&self) -> RequestKind {
        self.location.kind()
    }

    pub fn is_unknown(&self) -> bool {
        self.kind() == RequestKind::Unknown
    }

    /// Same breakpoint target. Kernel and any-location requests key on the
    /// name alone; source requests on (file, line), where two missing files
    /// are equal.
    pub fn matches(&self, other: &BreakpointRequest) -> bool {
        match (&self.location, &other.location) {
            (RequestLocation::Unknown, RequestLocation::Unknown) => true,
            (
                RequestLocation::KernelFunction { name: a },
                RequestLocation::KernelFunction { name: b },
            ) => a == b,
            (
                RequestLocation::AnyLocation { pattern: a },
                RequestLocation::AnyLocation { pattern: b },
            ) => a == b,
            (
                RequestLocation::SourceLocation {
                    file: fa, line: la, ..
                },
                RequestLocation::SourceLocation {
                    file: fb, line: lb, ..
                },
            ) => la == lb && fa == fb,
            _ => false,
        }
    }

    /// Release the payload and reset to Unknown
    pub fn clear(&mut self) {
        self.number = -1;
        self.location = RequestLocation::Unknown;
        self.condition.clear();
    }
}

/// Parses `<prefix>[:[<kernel> | <line> | <file>:<line>]]`
#[derive(Debug, Clone, Copy)]
pub struct RequestParser<'a> {
    prefix: &'a str,
    active_file: &'a str,
}

impl<'a> RequestParser<'a> {
    /// `active_file` names the file used for `<prefix>:<line>`
    pub fn new(prefix: &'a str, active_file: &'a str) -> Self {
        Self {
            prefix,
            active_file,
        }
    }

    /// True if `text` is meant as a GPU breakpoint at all
    pub fn claims(&self, text: &str) -> bool {
        text.trim_start().starts_with(self.prefix)
    }

    /// Parse a location and its optional condition. A condition may also be
    /// written inline after the location (`rocm:12 if wg:...`).
    pub fn parse(
        &self,
        number: i32,
        text: &str,
        condition: Option<&str>,
    ) -> Result<BreakpointRequest> {
        let (location_text, inline_condition) = split_condition(text);
        let location = self.parse_location(location_text)?;
        let condition = BreakpointCondition::parse(condition.or(inline_condition))?;
        debug!(
            target: "wavepoint_core::breakpoint",
            number,
            kind = ?location.kind(),
            condition = ?condition.code,
            "Parsed GPU breakpoint"
        );
        Ok(BreakpointRequest::new(number, location, condition))
    }

    pub fn parse_location(&self, text: &str) -> Result<RequestLocation> {
        let syntax = |why: &str| Error::BreakpointSyntax(format!("{}: \"{}\"", why, text));

        let rest = text
            .trim_start()
            .strip_prefix(self.prefix)
            .ok_or_else(|| syntax("missing prefix"))?
            .trim_start();
        if rest.is_empty() {
            return Ok(any_location());
        }

        let rest = rest
            .strip_prefix(':')
            .ok_or_else(|| syntax("expected ':' after prefix"))?
            .trim_start();
        if rest.is_empty() {
            return Ok(any_location());
        }

        if let Some(line) = parse_c_integer(rest) {
            return Ok(RequestLocation::SourceLocation {
                file: Some(self.active_file.to_string()),
                line,
                source_line: None,
            });
        }

        match rest.matches(':').count() {
            0 => Ok(RequestLocation::KernelFunction {
                name: rest.trim_end().to_string(),
            }),
            1 => {
                let (file, line) = rest.split_once(':').ok_or_else(|| syntax("bad location"))?;
                let line = parse_c_integer(line).ok_or_else(|| syntax("invalid line number"))?;
                let file = file.trim();
                Ok(RequestLocation::SourceLocation {
                    file: (!file.is_empty()).then(|| file.to_string()),
                    line,
                    source_line: None,
                })
            }
            _ => Err(syntax("too many ':' separators")),
        }
    }
}

fn any_location() -> RequestLocation {
    RequestLocation::AnyLocation {
        pattern: ANY_KERNEL_PATTERN.to_string(),
    }
}

fn split_condition(text: &str) -> (&str, Option<&str>) {
    match text.find(" if ") {
        Some(i) => (&text[..i], Some(text[i..].trim_start())),
        None => (text, None),
    }
}

/// Unsigned integer with C prefixes: `0x` hex, leading `0` octal, else decimal.
/// Surrounding whitespace is allowed; anything else is not.
pub fn parse_c_integer(text: &str) -> Option<u64> {
    let text = text.trim();
    let (digits, radix) = if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        (hex, 16)
    } else if text.len() > 1 && text.starts_with('0') {
        (&text[1..], 8)
    } else {
        (text, 10)
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    u64::from_str_radix(digits, radix).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> RequestParser<'static> {
        RequestParser::new("rocm", "temp_source")
    }

    fn location(text: &str) -> Result<RequestLocation> {
        parser().parse_location(text)
    }

    #[test]
    fn test_any_location_forms() {
        for text in ["rocm", "rocm:", "  rocm  ", "rocm :  "] {
            assert_eq!(location(text).unwrap().kind(), RequestKind::AnyLocation, "{}", text);
        }
    }

    #[test]
    fn test_line_uses_active_file() {
        assert_eq!(
            location("rocm:7").unwrap(),
            RequestLocation::SourceLocation {
                file: Some("temp_source".into()),
                line: 7,
                source_line: None,
            }
        );
        assert_eq!(
            RequestParser::new("rocm", "vadd.cl").parse_location("rocm: 0x10 ").unwrap(),
            RequestLocation::SourceLocation {
                file: Some("vadd.cl".into()),
                line: 16,
                source_line: None,
            }
        );
    }

    #[test]
    fn test_file_and_line() {
        assert_eq!(
            location("rocm:foo.cl:42").unwrap(),
            RequestLocation::SourceLocation {
                file: Some("foo.cl".into()),
                line: 42,
                source_line: None,
            }
        );
        assert_eq!(
            location("rocm: dir/k.cl : 9").unwrap(),
            RequestLocation::SourceLocation {
                file: Some("dir/k.cl".into()),
                line: 9,
                source_line: None,
            }
        );
        match location("rocm::5").unwrap() {
            RequestLocation::SourceLocation { file, line, .. } => {
                assert_eq!(file, None);
                assert_eq!(line, 5);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_kernel_function() {
        assert_eq!(
            location("rocm:my_kernel").unwrap(),
            RequestLocation::KernelFunction {
                name: "my_kernel".into()
            }
        );
        assert_eq!(
            location("rocm:  &__OpenCL_vadd_kernel  ").unwrap(),
            RequestLocation::KernelFunction {
                name: "&__OpenCL_vadd_kernel".into()
            }
        );
    }

    #[test]
    fn test_rejections() {
        for text in [
            "main.c:10",
            "roc:5",
            "rocmfoo",
            "rocm:a:b:3",
            "rocm:a.cl:b:3",
            "rocm:a.cl:x",
        ] {
            assert!(
                matches!(location(text), Err(Error::BreakpointSyntax(_))),
                "{}",
                text
            );
        }
        assert!(!parser().claims("main.c:10"));
        assert!(parser().claims("  rocm:1"));
    }

    #[test]
    fn test_negative_line_is_a_name() {
        assert_eq!(
            location("rocm:-3").unwrap(),
            RequestLocation::KernelFunction { name: "-3".into() }
        );
    }

    #[test]
    fn test_condition_equal() {
        let cond = BreakpointCondition::parse(Some("if wg:1,2,3 wi:0,0,0")).unwrap();
        assert_eq!(cond.code, ConditionCode::Equal);
        assert_eq!(cond.work_group, WaveDim3::new(1, 2, 3));
        assert_eq!(cond.work_item, WaveDim3::ZERO);

        let swapped = BreakpointCondition::parse(Some("if wi:4,5,6 wg:7,8,9")).unwrap();
        assert_eq!(swapped.work_group, WaveDim3::new(7, 8, 9));
        assert_eq!(swapped.work_item, WaveDim3::new(4, 5, 6));
    }

    #[test]
    fn test_condition_absent_is_any() {
        assert_eq!(BreakpointCondition::parse(None).unwrap().code, ConditionCode::Any);
        assert_eq!(
            BreakpointCondition::parse(Some("  ")).unwrap().code,
            ConditionCode::Any
        );
    }

    #[test]
    fn test_condition_errors() {
        for text in ["wg:1,2,3 wi:0,0,0", "if wg:1,2,3", "if wi:1,2", "if x > 3"] {
            assert!(
                matches!(
                    BreakpointCondition::parse(Some(text)),
                    Err(Error::ConditionSyntax(_))
                ),
                "{}",
                text
            );
        }
    }

    #[test]
    fn test_inline_condition() {
        let req = parser()
            .parse(3, "rocm:12 if wg:0,0,0 wi:1,0,0", None)
            .unwrap();
        assert_eq!(req.number, 3);
        assert_eq!(req.kind(), RequestKind::SourceLocation);
        assert_eq!(req.condition.code, ConditionCode::Equal);
        assert_eq!(req.condition.work_item, WaveDim3::new(1, 0, 0));
    }

    #[test]
    fn test_clone_then_compare_every_kind() {
        let p = parser();
        let mut requests = vec![
            p.parse(1, "rocm", None).unwrap(),
            p.parse(2, "rocm:vadd", None).unwrap(),
            p.parse(3, "rocm:12", Some("if wg:1,1,1 wi:0,0,0")).unwrap(),
            p.parse(4, "rocm:k.cl:3", None).unwrap(),
            p.parse(5, "rocm::3", None).unwrap(),
        ];
        let mut cleared = requests[0].clone();
        cleared.clear();
        requests.push(cleared);

        for req in &requests {
            let copy = req.clone();
            assert!(req.matches(&copy), "{:?}", req);
            assert_eq!(&copy, req);
        }
    }

    #[test]
    fn test_compare_rules() {
        let p = parser();
        let a = p.parse(1, "rocm:vadd", None).unwrap();
        let b = p.parse(2, "rocm:vadd", Some("if wg:0,0,0 wi:0,0,0")).unwrap();
        let c = p.parse(3, "rocm:vsub", None).unwrap();
        assert!(a.matches(&b));
        assert!(!a.matches(&c));

        let s1 = p.parse(4, "rocm::8", None).unwrap();
        let s2 = p.parse(5, "rocm::8", None).unwrap();
        let s3 = p.parse(6, "rocm:x.cl:8", None).unwrap();
        assert!(s1.matches(&s2));
        assert!(!s1.matches(&s3));
        assert!(!s1.matches(&a));
    }

    #[test]
    fn test_clear_resets_condition() {
        let mut req = parser()
            .parse(9, "rocm:k", Some("if wg:1,2,3 wi:4,5,6"))
            .unwrap();
        req.clear();
        assert!(req.is_unknown());
        assert_eq!(req.condition.code, ConditionCode::Unknown);
        assert_eq!(req.condition.work_group, WaveDim3::UNKNOWN);
        assert_eq!(req.condition.work_item, WaveDim3::UNKNOWN);
        assert_eq!(req.condition.text, None);
    }

    #[test]
    fn test_parse_c_integer() {
        assert_eq!(parse_c_integer("42"), Some(42));
        assert_eq!(parse_c_integer(" 0x1F "), Some(31));
        assert_eq!(parse_c_integer("017"), Some(15));
        assert_eq!(parse_c_integer("0"), Some(0));
        assert_eq!(parse_c_integer("08"), None);
        assert_eq!(parse_c_integer("12a"), None);
        assert_eq!(parse_c_integer("0x"), None);
        assert_eq!(parse_c_integer(""), None);
    }

    #[test]
    fn test_condition_packet() {
        let eq = BreakpointCondition::equal(WaveDim3::new(1, 0, 0), WaveDim3::new(2, 0, 0));
        assert_eq!(eq.to_packet().work_group, WaveDim3::new(1, 0, 0));
        let any = BreakpointCondition::any().to_packet();
        assert_eq!(any.code, ConditionCode::Any);
        assert_eq!(any.work_group, WaveDim3::ZERO);
        assert!(eq.matches_work_group(WaveDim3::new(1, 0, 0)));
        assert!(!eq.matches_work_group(WaveDim3::ZERO));
        assert!(BreakpointCondition::any().matches_work_group(WaveDim3::ZERO));
    }
}

//! Step Dispatcher：把 Oracle 的原始文本转为 Decision
//!
//! 1. extract_payload：从文本中取出 JSON 对象（容忍代码围栏、三引号与前后说明文字），失败时做一次修复
//! 2. final_answer 直接短路为终止
//! 3. 解析 `name(arg)` 形式的 action_code，参数为引号字符串 / 整数 / 原样 token；`)` 之后不允许有多余文本
//! 4. 注册表校验名称、参数个数与类型；任何不合法都得到 Decision::Reject，不会触达环境
//!
//! 文本中没有 JSON 对象属于 Oracle 格式错误（由 oracle 重试），不在这里处理。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::actions::{ActionInvocation, ActionRegistry, ArgValue};
use crate::core::DispatchError;

/// 载荷级终止动作名（不区分大小写）
pub const FINAL_ANSWER: &str = "final_answer";

static FENCED_RE: OnceLock<Option<Regex>> = OnceLock::new();
static TRIPLE_QUOTE_RE: OnceLock<Option<Regex>> = OnceLock::new();
static TRAILING_COMMA_RE: OnceLock<Option<Regex>> = OnceLock::new();
static BARE_KEY_RE: OnceLock<Option<Regex>> = OnceLock::new();
static NAME_RE: OnceLock<Option<Regex>> = OnceLock::new();
static INTEGER_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

/// 从回复中取出的决策字段
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecisionPayload {
    pub observation: String,
    pub reasoning: String,
    pub action_code: Option<String>,
    pub answer: Option<String>,
    /// 对象本身没有任何键
    pub empty: bool,
}

fn field_text(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl DecisionPayload {
    fn from_object(map: &Map<String, Value>) -> Self {
        Self {
            observation: field_text(map, "observation").unwrap_or_default(),
            reasoning: field_text(map, "reasoning").unwrap_or_default(),
            action_code: field_text(map, "action_code"),
            answer: field_text(map, "answer"),
            empty: map.is_empty(),
        }
    }
}

/// 缩小到最可能包含 JSON 的片段：代码围栏优先，其次三引号块
fn narrow(text: &str) -> &str {
    let mut region = text;
    if let Some(caps) = cached(&FENCED_RE, r"(?s)```(?:json|JSON)?\s*(.*?)\s*```")
        .and_then(|re| re.captures(region))
    {
        if let Some(m) = caps.get(1) {
            region = m.as_str();
        }
    }
    if let Some(caps) = cached(&TRIPLE_QUOTE_RE, r#"(?s)"""(?:json|JSON)?\s*(.*?)\s*""""#)
        .and_then(|re| re.captures(region))
    {
        if let Some(m) = caps.get(1) {
            region = m.as_str();
        }
    }
    region
}

fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// 修复常见的畸形 JSON：截断的尾部、尾随逗号、未加引号的键
fn repair(candidate: &str) -> String {
    let mut text = candidate.trim().to_string();
    if !text.ends_with('}') {
        // 未闭合：丢弃最后一个完整成员之后的残余
        if let Some(cut) = text.rfind(',') {
            text.truncate(cut);
        }
        text.push('}');
    }
    if let Some(re) = cached(&TRAILING_COMMA_RE, r",\s*([}\]])") {
        text = re.replace_all(&text, "$1").into_owned();
    }
    if let Some(re) = cached(&BARE_KEY_RE, r#"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:"#) {
        text = re.replace_all(&text, r#"$1"$2":"#).into_owned();
    }
    text
}

/// 从 Oracle 回复中提取决策对象；文本中没有可解析的 JSON 对象时返回 None
pub fn extract_payload(text: &str) -> Option<DecisionPayload> {
    let region = narrow(text.trim());
    let start = region.find('{')?;
    let candidate = match region.rfind('}') {
        Some(end) if end > start => &region[start..=end],
        _ => &region[start..],
    };

    if let Some(map) = parse_object(candidate) {
        return Some(DecisionPayload::from_object(&map));
    }
    let repaired = repair(candidate);
    match parse_object(&repaired) {
        Some(map) => {
            tracing::debug!("decision payload parsed after repair");
            Some(DecisionPayload::from_object(&map))
        }
        None => None,
    }
}

/// 参数列表中的一个 token；引号 token 只保留引号内的原文
struct ArgToken {
    text: String,
    quoted: bool,
}

fn to_arg(token: ArgToken) -> ArgValue {
    if token.quoted {
        return ArgValue::Str(token.text);
    }
    let text = token.text.trim();
    if cached(&INTEGER_RE, r"^-?\d+$").is_some_and(|re| re.is_match(text)) {
        if let Ok(n) = text.parse::<i64>() {
            return ArgValue::Int(n);
        }
    }
    ArgValue::Raw(text.to_string())
}

/// 扫描 `(` 之后的参数列表，直到与之匹配的 `)`；返回各 token 与 `)` 之后的剩余文本
///
/// 引号只在 token 开头生效，且只有后面紧跟 `,` / `)`（可隔空白）的同种引号才闭合，
/// 因此 `'Open (24h)'`、`'McDonald's'` 都按一个字符串处理。未加引号的 token 中括号需配对。
fn scan_args(body: &str) -> Result<(Vec<ArgToken>, &str), DispatchError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut quoted_token = false;
    let mut depth = 0usize;

    for (i, c) in body.char_indices() {
        if let Some(q) = quote {
            if c == q {
                let closes = body[i + c.len_utf8()..]
                    .trim_start()
                    .chars()
                    .next()
                    .map_or(true, |next| next == ',' || next == ')');
                if closes {
                    quote = None;
                    continue;
                }
            }
            current.push(c);
            continue;
        }
        match c {
            '\'' | '"' if current.trim().is_empty() && !quoted_token => {
                current.clear();
                quote = Some(c);
                quoted_token = true;
            }
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' if depth > 0 => {
                depth -= 1;
                current.push(c);
            }
            ')' => {
                tokens.push(ArgToken {
                    text: std::mem::take(&mut current),
                    quoted: quoted_token,
                });
                return Ok((tokens, &body[i + 1..]));
            }
            ',' if depth == 0 => {
                tokens.push(ArgToken {
                    text: std::mem::take(&mut current),
                    quoted: quoted_token,
                });
                quoted_token = false;
            }
            c if quoted_token && !c.is_whitespace() => {
                return Err(DispatchError::MalformedCall(format!(
                    "unexpected '{}' after quoted argument",
                    c
                )));
            }
            c if quoted_token => {}
            c => current.push(c),
        }
    }
    Err(DispatchError::MalformedCall(match quote {
        Some(q) => format!("unterminated {} quote", q),
        None => "missing closing ')'".to_string(),
    }))
}

/// 解析 action_code：`name(arg, ...)` 或裸 `name`
///
/// 这里只检查语法；参数个数与类型交给注册表校验。`)` 之后不允许再有文本。
pub fn parse_action_code(code: &str) -> Result<(String, Vec<ArgValue>), DispatchError> {
    let code = code.trim();
    if code.is_empty() {
        return Err(DispatchError::EmptyPayload);
    }
    let name = cached(&NAME_RE, r"^\w+")
        .and_then(|re| re.find(code))
        .map(|m| m.as_str())
        .ok_or_else(|| DispatchError::UnknownAction(code.to_string()))?;
    let rest = code[name.len()..].trim_start();
    if rest.is_empty() {
        return Ok((name.to_string(), Vec::new()));
    }
    let body = rest
        .strip_prefix('(')
        .ok_or_else(|| DispatchError::UnknownAction(code.to_string()))?;

    let (tokens, trailing) = scan_args(body)?;
    let trailing = trailing.trim();
    if !trailing.is_empty() {
        return Err(DispatchError::MalformedCall(format!(
            "unexpected text after ')': '{}'",
            trailing
        )));
    }

    // `name()` 扫描出一个空 token，表示无参数
    if tokens.len() == 1 && !tokens[0].quoted && tokens[0].text.trim().is_empty() {
        return Ok((name.to_string(), Vec::new()));
    }
    if tokens.iter().any(|t| !t.quoted && t.text.trim().is_empty()) {
        return Err(DispatchError::MalformedCall(format!(
            "empty argument in '{}'",
            code
        )));
    }
    Ok((name.to_string(), tokens.into_iter().map(to_arg).collect()))
}

/// 分派结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// 合法动作调用
    Invoke {
        observation: String,
        reasoning: String,
        action_code: String,
        invocation: ActionInvocation,
    },
    /// 终止（final_answer 或 stop）
    Terminate {
        observation: String,
        reasoning: String,
        action_code: String,
        answer: Option<String>,
    },
    /// 分派失败，记录后继续
    Reject {
        observation: String,
        reasoning: String,
        action_code: String,
        error: DispatchError,
    },
}

impl Decision {
    pub fn is_termination(&self) -> bool {
        matches!(self, Decision::Terminate { .. })
    }
}

/// 持有注册表的分派器
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    registry: ActionRegistry,
}

impl Dispatcher {
    pub fn new(registry: ActionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// 把已提取的载荷转为 Decision
    pub fn dispatch(&self, payload: DecisionPayload) -> Decision {
        let DecisionPayload {
            observation,
            reasoning,
            action_code,
            answer,
            empty,
        } = payload;

        let reject = |action_code: String, error: DispatchError| Decision::Reject {
            observation: observation.clone(),
            reasoning: reasoning.clone(),
            action_code,
            error,
        };

        let code = match action_code {
            _ if empty => return reject(String::new(), DispatchError::EmptyPayload),
            None => return reject(String::new(), DispatchError::MissingActionCode),
            Some(code) => code.trim().to_string(),
        };

        if code.eq_ignore_ascii_case(FINAL_ANSWER) {
            return Decision::Terminate {
                observation,
                reasoning,
                action_code: code,
                answer,
            };
        }

        let (name, args) = match parse_action_code(&code) {
            Ok(parsed) => parsed,
            Err(error) => return reject(code, error),
        };
        let spec = match self.registry.resolve(&name) {
            Ok(spec) => spec,
            Err(error) => return reject(code, error),
        };
        let invocation = match ActionInvocation::bind(spec, args) {
            Ok(invocation) => invocation,
            Err(error) => return reject(code, error),
        };

        if invocation.is_termination() {
            return Decision::Terminate {
                observation,
                reasoning,
                action_code: code,
                answer,
            };
        }
        Decision::Invoke {
            observation,
            reasoning,
            action_code: code,
            invocation,
        }
    }

    /// 提取 + 分派；文本中没有 JSON 对象时返回 None
    pub fn dispatch_text(&self, text: &str) -> Option<Decision> {
        extract_payload(text).map(|payload| self.dispatch(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ArgKind;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(ActionRegistry::maps())
    }

    const BARE: &str = r#"{"observation": "A plaza", "reasoning": "look around", "action_code": "street_view_turn_left()"}"#;

    #[test]
    fn test_prose_and_fences_parse_identically() {
        let d = dispatcher();
        let bare = d.dispatch_text(BARE).unwrap();
        let wrapped = [
            format!("Sure! Here is my decision:\n{}\nLet me know.", BARE),
            format!("```json\n{}\n```", BARE),
            format!("Thinking...\n```\n{}\n```\ndone", BARE),
            format!("\"\"\"json\n{}\n\"\"\"", BARE),
        ];
        for text in wrapped {
            assert_eq!(d.dispatch_text(&text).unwrap(), bare, "{}", text);
        }
        assert!(matches!(
            bare,
            Decision::Invoke { invocation: ActionInvocation::TurnLeft, .. }
        ));
    }

    #[test]
    fn test_no_object_is_format_failure() {
        assert!(extract_payload("I will turn left now.").is_none());
        assert!(extract_payload("").is_none());
        assert!(dispatcher().dispatch_text("{ not json at all").is_none());
    }

    #[test]
    fn test_repair_bare_keys_and_trailing_comma() {
        let payload = extract_payload(r#"{observation: "x", action_code: "back()",}"#).unwrap();
        assert_eq!(payload.action_code.as_deref(), Some("back()"));
        assert_eq!(payload.observation, "x");

        let truncated = extract_payload(r#"{"observation": "x", "action_code": "stop", "reasoning": "cut of"#).unwrap();
        assert_eq!(truncated.action_code.as_deref(), Some("stop"));
    }

    #[test]
    fn test_final_answer_short_circuits() {
        let d = dispatcher();
        let decision = d
            .dispatch_text(r#"{"action_code": "FINAL_ANSWER", "answer": "2019-05"}"#)
            .unwrap();
        match decision {
            Decision::Terminate { answer, .. } => assert_eq!(answer.as_deref(), Some("2019-05")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_stop_terminates_but_validates_arity() {
        let d = dispatcher();
        assert!(d
            .dispatch_text(r#"{"action_code": "stop()"}"#)
            .unwrap()
            .is_termination());
        assert!(d
            .dispatch_text(r#"{"action_code": "stop"}"#)
            .unwrap()
            .is_termination());
        match d.dispatch_text(r#"{"action_code": "stop(1)"}"#).unwrap() {
            Decision::Reject { error, .. } => {
                assert_eq!(error, DispatchError::UnexpectedArgument { action: "stop".into() })
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_and_empty_are_rejected() {
        let d = dispatcher();
        let reject = |text: &str| match d.dispatch_text(text).unwrap() {
            Decision::Reject { error, .. } => error,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(reject("{}"), DispatchError::EmptyPayload);
        assert_eq!(reject(r#"{"action_code": "  "}"#), DispatchError::EmptyPayload);
        assert_eq!(reject(r#"{"observation": "x"}"#), DispatchError::MissingActionCode);
        assert_eq!(
            reject(r#"{"action_code": "show_historical_dates()"}"#),
            DispatchError::UnknownAction("show_historical_dates".into())
        );
        assert_eq!(
            reject(r#"{"action_code": "done"}"#),
            DispatchError::UnknownAction("done".into())
        );
        assert!(matches!(
            reject(r#"{"action_code": "turn left please"}"#),
            DispatchError::UnknownAction(_)
        ));
    }

    #[test]
    fn test_argument_coercion() {
        let d = dispatcher();
        let invoke = |text: &str| match d.dispatch_text(text).unwrap() {
            Decision::Invoke { invocation, .. } => invocation,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(invoke(r#"{"action_code": "click_marker(2)"}"#), ActionInvocation::ClickMarker(2));
        assert_eq!(invoke(r#"{"action_code": "click_marker('3')"}"#), ActionInvocation::ClickMarker(3));
        assert_eq!(
            invoke(r#"{"action_code": "select_historical_date('July 2010')"}"#),
            ActionInvocation::SelectHistoricalDate("July 2010".into())
        );
        assert_eq!(
            invoke(r#"{"action_code": "click_id(42)"}"#),
            ActionInvocation::ClickId("42".into())
        );
        assert_eq!(
            invoke(r#"{"action_code": "find_text_on_page(Opening hours)"}"#),
            ActionInvocation::FindText("Opening hours".into())
        );

        match d.dispatch_text(r#"{"action_code": "click_marker('first')"}"#).unwrap() {
            Decision::Reject { error, .. } => assert!(matches!(
                error,
                DispatchError::InvalidArgument { expected: ArgKind::Integer, .. }
            )),
            other => panic!("unexpected {:?}", other),
        }
        match d.dispatch_text(r#"{"action_code": "click_marker(-1)"}"#).unwrap() {
            Decision::Reject { error, .. } => {
                assert!(matches!(error, DispatchError::InvalidArgument { .. }))
            }
            other => panic!("unexpected {:?}", other),
        }
        match d.dispatch_text(r#"{"action_code": "street_view_move_forward(2)"}"#).unwrap() {
            Decision::Reject { error, .. } => assert!(matches!(
                error,
                DispatchError::UnexpectedArgument { .. }
            )),
            other => panic!("unexpected {:?}", other),
        }
        match d.dispatch_text(r#"{"action_code": "click_marker()"}"#).unwrap() {
            Decision::Reject { error, .. } => {
                assert!(matches!(error, DispatchError::MissingArgument { .. }))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_argument_count_and_trailing_text() {
        let d = dispatcher();
        let reject = |code: &str| {
            let text = serde_json::json!({ "action_code": code }).to_string();
            match d.dispatch_text(&text).unwrap() {
                Decision::Reject { error, .. } => error,
                other => panic!("{} unexpectedly gave {:?}", code, other),
            }
        };
        assert_eq!(
            reject("click_id('a', 'b')"),
            DispatchError::TooManyArguments { action: "click_id".into(), got: 2 }
        );
        assert_eq!(
            reject("select_historical_date('July 2010', 'Aug 2011')"),
            DispatchError::TooManyArguments { action: "select_historical_date".into(), got: 2 }
        );
        assert_eq!(
            reject("click_marker(1, 2, 3)"),
            DispatchError::TooManyArguments { action: "click_marker".into(), got: 3 }
        );
        assert!(matches!(reject("click_marker(0) ; stop()"), DispatchError::MalformedCall(_)));
        assert!(matches!(reject("click_marker(0"), DispatchError::MalformedCall(_)));
        assert!(matches!(reject("click_id('abc)"), DispatchError::MalformedCall(_)));
        assert!(matches!(reject("click_id(a,)"), DispatchError::MalformedCall(_)));
        assert_eq!(
            reject("flip_view(1, 2)"),
            DispatchError::UnexpectedArgument { action: "flip_view".into() }
        );
        // 名称校验先于参数个数
        assert_eq!(
            reject("fly_to('a', 'b')"),
            DispatchError::UnknownAction("fly_to".into())
        );
    }

    #[test]
    fn test_quoted_arguments_keep_parentheses_and_commas() {
        let d = dispatcher();
        let invoke = |code: &str| {
            let text = serde_json::json!({ "action_code": code }).to_string();
            match d.dispatch_text(&text).unwrap() {
                Decision::Invoke { invocation, .. } => invocation,
                other => panic!("{} unexpectedly gave {:?}", code, other),
            }
        };
        assert_eq!(
            invoke("find_text_on_page('Open (24h)')"),
            ActionInvocation::FindText("Open (24h)".into())
        );
        assert_eq!(
            invoke(r#"find_text_on_page("Paris, France")"#),
            ActionInvocation::FindText("Paris, France".into())
        );
        assert_eq!(
            invoke("find_text_on_page('McDonald's')"),
            ActionInvocation::FindText("McDonald's".into())
        );
        assert_eq!(
            invoke("find_text_on_page(Hours (today))"),
            ActionInvocation::FindText("Hours (today)".into())
        );
        assert_eq!(invoke("click_marker( 4 )"), ActionInvocation::ClickMarker(4));
        assert_eq!(invoke("get_url ()"), ActionInvocation::GetUrl);
    }

    #[test]
    fn test_accepted_names_resolve() {
        let d = dispatcher();
        for spec in d.registry().iter() {
            let code = match spec.arg {
                ArgKind::None => format!("{}()", spec.name),
                ArgKind::String => format!("{}('x')", spec.name),
                ArgKind::Integer => format!("{}(0)", spec.name),
            };
            let text = serde_json::json!({ "action_code": code }).to_string();
            let decision = d.dispatch_text(&text).unwrap();
            assert!(!matches!(decision, Decision::Reject { .. }), "{}", code);
            assert!(d.registry().resolve(spec.name).is_ok());
        }
    }
}

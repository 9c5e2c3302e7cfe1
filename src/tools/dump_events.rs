use std::io::BufRead;

use anyhow::Result;

use exi_rs::parser::{ContentHandler, HandlerAction, Parser};
use exi_rs::values::{ExiDateTime, ExiDecimal, ExiFloat};
use exi_rs::QName;

#[derive(Default)]
struct PrintHandler {
    depth: usize,
}

impl PrintHandler {
    fn line(&self, text: impl std::fmt::Display) {
        println!("{:indent$}{text}", "", indent = self.depth * 2);
    }
}

impl ContentHandler for PrintHandler {
    fn start_document(&mut self) -> HandlerAction {
        self.line("SD");
        HandlerAction::Continue
    }

    fn end_document(&mut self) -> HandlerAction {
        self.line("ED");
        HandlerAction::Continue
    }

    fn start_element(&mut self, qname: &QName) -> HandlerAction {
        self.line(format!("SE {qname}"));
        self.depth += 1;
        HandlerAction::Continue
    }

    fn end_element(&mut self) -> HandlerAction {
        self.depth = self.depth.saturating_sub(1);
        self.line("EE");
        HandlerAction::Continue
    }

    fn attribute(&mut self, qname: &QName) -> HandlerAction {
        self.line(format!("AT {qname}"));
        HandlerAction::Continue
    }

    fn string_data(&mut self, value: &str) -> HandlerAction {
        self.line(format!("CH {value:?}"));
        HandlerAction::Continue
    }

    fn int_data(&mut self, value: i64) -> HandlerAction {
        self.line(format!("CH (int) {value}"));
        HandlerAction::Continue
    }

    fn boolean_data(&mut self, value: bool) -> HandlerAction {
        self.line(format!("CH (boolean) {value}"));
        HandlerAction::Continue
    }

    fn float_data(&mut self, value: ExiFloat) -> HandlerAction {
        self.line(format!(
            "CH (float) {}E{}",
            value.mantissa, value.exponent
        ));
        HandlerAction::Continue
    }

    fn decimal_data(&mut self, value: ExiDecimal) -> HandlerAction {
        self.line(format!("CH (decimal) {}", value.to_f64()));
        HandlerAction::Continue
    }

    fn binary_data(&mut self, value: &[u8]) -> HandlerAction {
        self.line(format!("CH (binary) {} bytes", value.len()));
        HandlerAction::Continue
    }

    fn date_time_data(&mut self, value: ExiDateTime) -> HandlerAction {
        self.line(format!(
            "CH (dateTime) {:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
            value.year,
            value.month,
            value.day,
            value.hour,
            value.minute,
            value.second
        ));
        HandlerAction::Continue
    }

    fn namespace_declaration(
        &mut self,
        uri: &str,
        prefix: &str,
        is_local: bool,
    ) -> HandlerAction {
        self.line(format!("NS {prefix}={uri} local={is_local}"));
        HandlerAction::Continue
    }
}

pub fn dump_events<I: BufRead>(input: I) -> Result<()> {
    let mut parser = Parser::new(input, None);
    parser.parse_all(&mut PrintHandler::default())
}

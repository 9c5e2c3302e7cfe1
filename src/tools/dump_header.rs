use std::io::BufRead;

use anyhow::Result;

use exi_rs::parser::Parser;

pub fn dump_header<I: BufRead>(input: I) -> Result<()> {
    let mut parser = Parser::new(input, None);
    let header = parser.parse_header()?;
    println!("{header:#?}");
    Ok(())
}

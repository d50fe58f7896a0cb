use std::collections::BTreeSet;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formula {
    pub text: String,
    pub lhs: String,
    pub rhs: String,
}

impl Formula {
    pub fn parse(text: &str) -> Result<Self> {
        let (lhs, rhs) = split(text)?;
        Ok(Self {
            text: text.trim().to_string(),
            lhs,
            rhs,
        })
    }

    pub fn required_variables(&self) -> Result<BTreeSet<String>> {
        required_variables(&self.rhs)
    }
}

pub fn split(formula: &str) -> Result<(String, String)> {
    Ok(wilkinson::split_formula(formula)?)
}

pub fn required_variables(rhs: &str) -> Result<BTreeSet<String>> {
    Ok(wilkinson::required_variables(rhs)?)
}

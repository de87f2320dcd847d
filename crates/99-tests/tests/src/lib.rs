//! End-to-end tests for the CAN transport stack.

#[cfg(test)]
mod support;

#[cfg(test)]
mod scenarios;

#[cfg(test)]
mod gateway_e2e;

use super::instruction::Insn;

/// Output of the IR stage: linear code, static data, and the number of
/// abstract variables the code references.
#[derive(Debug, Clone, Default)]
pub struct IrProgram {
    /// IR instructions in emission order
    pub code: Vec<Insn>,
    /// Static data words: reserved low words, string literals,
    /// `alloc-static` reservations
    pub data: Vec<u32>,
    /// Variable ids are dense in `[0, num_variables)`
    pub num_variables: u32,
}

pub mod note;
pub mod simulate;

pub use note::NoteCommand;
pub use simulate::SimulateCommand;

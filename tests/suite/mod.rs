mod cli;
mod qml;

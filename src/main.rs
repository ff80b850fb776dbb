fn main() -> anyhow::Result<()> {
    comanda_pos_lib::run()
}
